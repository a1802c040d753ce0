use serde::Deserialize;
use validator::Validate;

use crate::validation::PHONE_RE;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEmailRequest {
    #[validate(email(message = "Invalid email"))]
    pub new_email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TokenRequest {
    #[validate(length(min = 1))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    #[validate(length(min = 1, max = 100))]
    pub old_password: String,
    #[validate(length(min = 6, max = 100))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePhoneRequest {
    #[validate(regex(path = *PHONE_RE, message = "Invalid phone"))]
    pub new_phone: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNameRequest {
    #[validate(length(min = 1, max = 100))]
    pub new_name: String,
}
