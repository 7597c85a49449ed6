use common::UserId;

/// The authenticated user a request is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub email: String,
    /// Raw bearer token, forwarded to collaborators.
    pub token: String,
    pub is_admin: bool,
}

impl Caller {
    pub fn user(user_id: impl Into<UserId>, email: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            token: token.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<UserId>, email: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::user(user_id, email, token)
        }
    }
}
