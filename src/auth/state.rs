//! Authentication state trait and macro.

use crate::service::TokenService;

/// Trait for state types that can authenticate requests.
pub trait HasTokenService {
    fn tokens(&self) -> &TokenService;
}

/// Implement `HasTokenService` for a state struct with a `tokens: TokenService` field.
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct MyState {
///     pub tokens: TokenService,
/// }
///
/// impl_has_token_service!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_token_service {
    ($state_type:ty) => {
        impl $crate::auth::HasTokenService for $state_type {
            fn tokens(&self) -> &$crate::service::TokenService {
                &self.tokens
            }
        }
    };
}
