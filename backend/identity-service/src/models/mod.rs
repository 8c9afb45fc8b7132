/// Request and response shapes for the identity flows
pub mod requests;
pub mod responses;

pub use requests::{
    ChangeEmailRequest, ChangePasswordRequest, ClientContext, ForgotPasswordRequest, LoginRequest,
    RegisterRequest, VerifyCodeRequest,
};
pub use responses::{AuthResponse, StatusResponse};
