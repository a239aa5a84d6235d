use crate::server::response::ApiError;

const MAX_ROLE_NAME_LEN: usize = 64;
const MAX_EMAIL_LEN: usize = 254;
const MIN_PASSWORD_LEN: usize = 8;

fn is_valid_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

pub fn validate_role_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() {
        return Err(ApiError::bad_request("Role name cannot be empty"));
    }
    if name.len() > MAX_ROLE_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "Role name cannot exceed {MAX_ROLE_NAME_LEN} characters"
        )));
    }
    if !name.chars().all(is_valid_name_char) {
        return Err(ApiError::bad_request(
            "Role name can only contain alphanumeric characters, hyphens, underscores, and periods",
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let email = email.trim();
    if email.len() > MAX_EMAIL_LEN {
        return Err(ApiError::bad_request(format!(
            "Email cannot exceed {MAX_EMAIL_LEN} characters"
        )));
    }
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && domain.contains('.') && !domain.contains('@') =>
        {
            Ok(())
        }
        _ => Err(ApiError::bad_request("Invalid email address")),
    }
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
