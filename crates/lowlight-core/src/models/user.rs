use serde::{Deserialize, Serialize};

/// Identity record returned by the auth service.
///
/// `created_at` is kept as the service formats it; the service emits naive
/// ISO timestamps, so there is no timezone to parse reliably.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(alias = "createdAt", default)]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<String>,
}

impl User {
    /// Name to show in prompts and listings
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_parses_service_payload() {
        let json = r#"{
            "id": "1",
            "email": "ada@example.com",
            "name": "Ada",
            "created_at": "2025-01-02T03:04:05.123456",
            "last_login": null
        }"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, "1");
        assert_eq!(user.created_at.as_deref(), Some("2025-01-02T03:04:05.123456"));
        assert_eq!(user.last_login, None);
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user = User {
            id: "1".into(),
            name: " ".into(),
            email: "ada@example.com".into(),
            created_at: None,
            last_login: None,
        };
        assert_eq!(user.display_name(), "ada@example.com");
    }
}
