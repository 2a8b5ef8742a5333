use crate::IdentityId;

/// Credential checks, kept apart from the identity records so a backend never hands
/// password material to business logic.
pub trait AuthService: 'static + Send + Sync + Clone {
    type Error: 'static + std::error::Error + Send + Sync;

    fn verify_user(&self, user_id: &IdentityId, password: String) -> async_result!(bool);
    /// Sets or replaces the credential of `user_id`.
    fn create_user(&self, user_id: &IdentityId, password: String) -> async_result!(());
    fn remove_user(&self, user_id: &IdentityId) -> async_result!(());
}
