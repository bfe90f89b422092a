//! Per-client-type message filtering.

use serde_json::Value as JsonValue;

use crate::connection::{ClientType, Connection};

/// Message types always delivered to instructors.
const INSTRUCTOR_ALWAYS: &[&str] = &["progress_update", "student_help_request"];

/// Message types dashboards subscribe to.
const DASHBOARD_TYPES: &[&str] = &["dashboard_update", "system_stats", "class_summary"];

/// Decides whether a message reaches a given connection.
///
/// Policy by client type:
/// - **Instructor**: `progress_update` and `student_help_request` always
///   pass. Otherwise a message carrying a `class_id` passes only when that
///   id appears in the instructor's `assigned_classes` metadata; a message
///   without a `class_id` key passes through.
/// - **Student**: a message carrying a `user_id` passes only when it equals
///   the student's subject id; a message without one passes through.
/// - **Dashboard**: only `dashboard_update`, `system_stats` and
///   `class_summary` pass.
/// - **Admin**: everything passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageFilter;

impl MessageFilter {
    pub fn should_send(&self, message: &JsonValue, connection: &Connection) -> bool {
        match connection.client_type {
            ClientType::Instructor => Self::instructor_allows(message, connection),
            ClientType::Student => Self::student_allows(message, connection),
            ClientType::Dashboard => Self::dashboard_allows(message),
            ClientType::Admin => true,
        }
    }

    fn instructor_allows(message: &JsonValue, connection: &Connection) -> bool {
        if let Some(msg_type) = message.get("type").and_then(JsonValue::as_str) {
            if INSTRUCTOR_ALWAYS.contains(&msg_type) {
                return true;
            }
        }
        match message.get("class_id").and_then(JsonValue::as_str) {
            Some(class_id) => connection
                .metadata
                .get("assigned_classes")
                .and_then(JsonValue::as_array)
                .map(|classes| classes.iter().any(|c| c.as_str() == Some(class_id)))
                .unwrap_or(false),
            // No class scoping on the message
            None => true,
        }
    }

    fn student_allows(message: &JsonValue, connection: &Connection) -> bool {
        match message.get("user_id").and_then(JsonValue::as_str) {
            Some(user_id) => connection.subject_id.as_deref() == Some(user_id),
            None => true,
        }
    }

    fn dashboard_allows(message: &JsonValue) -> bool {
        message
            .get("type")
            .and_then(JsonValue::as_str)
            .map(|t| DASHBOARD_TYPES.contains(&t))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn conn(client_type: ClientType, subject_id: Option<&str>, metadata: JsonValue) -> Connection {
        let (tx, _rx) = mpsc::channel(1);
        Connection::new(
            "c1".into(),
            client_type,
            subject_id.map(String::from),
            "default".into(),
            metadata,
            tx,
        )
    }

    #[test]
    fn test_student_matching_user_id_passes() {
        let c = conn(ClientType::Student, Some("A"), json!({}));
        let filter = MessageFilter;
        assert!(filter.should_send(
            &json!({"type": "student_progress_update", "user_id": "A"}),
            &c
        ));
    }

    #[test]
    fn test_student_other_user_id_filtered() {
        let c = conn(ClientType::Student, Some("B"), json!({}));
        assert!(!MessageFilter.should_send(
            &json!({"type": "student_progress_update", "user_id": "A"}),
            &c
        ));
    }

    #[test]
    fn test_student_without_user_id_passes() {
        let c = conn(ClientType::Student, Some("B"), json!({}));
        assert!(MessageFilter.should_send(&json!({"type": "announcement"}), &c));
    }

    #[test]
    fn test_instructor_always_allowed_types() {
        let c = conn(ClientType::Instructor, None, json!({}));
        for msg_type in ["progress_update", "student_help_request"] {
            assert!(MessageFilter.should_send(
                &json!({"type": msg_type, "class_id": "not-assigned"}),
                &c
            ));
        }
    }

    #[test]
    fn test_instructor_class_scoping() {
        let c = conn(
            ClientType::Instructor,
            None,
            json!({"assigned_classes": ["cs101", "cs102"]}),
        );
        assert!(MessageFilter.should_send(
            &json!({"type": "class_summary", "class_id": "cs101"}),
            &c
        ));
        assert!(!MessageFilter.should_send(
            &json!({"type": "class_summary", "class_id": "cs999"}),
            &c
        ));
    }

    #[test]
    fn test_instructor_unscoped_message_passes() {
        let c = conn(ClientType::Instructor, None, json!({}));
        assert!(MessageFilter.should_send(
            &json!({"type": "student_progress_update", "user_id": "A"}),
            &c
        ));
    }

    #[test]
    fn test_instructor_scoped_message_without_assignments_filtered() {
        let c = conn(ClientType::Instructor, None, json!({}));
        assert!(!MessageFilter.should_send(
            &json!({"type": "class_summary", "class_id": "cs101"}),
            &c
        ));
    }

    #[test]
    fn test_dashboard_allowed_types_only() {
        let c = conn(ClientType::Dashboard, None, json!({}));
        for msg_type in ["dashboard_update", "system_stats", "class_summary"] {
            assert!(MessageFilter.should_send(&json!({"type": msg_type}), &c));
        }
        assert!(!MessageFilter.should_send(&json!({"type": "student_progress_update"}), &c));
        assert!(!MessageFilter.should_send(&json!({"no_type": true}), &c));
    }

    #[test]
    fn test_admin_receives_all() {
        let c = conn(ClientType::Admin, None, json!({}));
        assert!(MessageFilter.should_send(&json!({"type": "anything", "user_id": "x"}), &c));
        assert!(MessageFilter.should_send(&json!({}), &c));
    }
}
