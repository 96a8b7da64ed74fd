use serde::{Deserialize, Serialize};

/// Role carried in the JWT; decides what a caller may see and mutate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Landlord,
    Agent,
    Admin,
}

impl Role {
    /// Agents and admins see and act on every booking.
    pub fn is_elevated(self) -> bool {
        matches!(self, Role::Agent | Role::Admin)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub role: Role,
    pub exp: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevated_roles() {
        assert!(Role::Agent.is_elevated());
        assert!(Role::Admin.is_elevated());
        assert!(!Role::Student.is_elevated());
        assert!(!Role::Landlord.is_elevated());
    }

    #[test]
    fn claims_roundtrip_with_lowercase_role() {
        let json = r#"{"sub":7,"username":"amina","role":"landlord","exp":2000000000}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.role, Role::Landlord);
        assert_eq!(claims.sub, 7);
    }
}
