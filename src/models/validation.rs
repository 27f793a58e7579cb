use crate::{error::ValidationError, models::request::NotificationRequest};

/// Ingress checks. Requests failing here are rejected with a client error.
pub fn validate_request(request: &NotificationRequest) -> Result<(), ValidationError> {
    request.requested_tier()?;
    request.parsed_channels()?;

    if request.recipient.user_id.trim().is_empty() {
        return Err(ValidationError::MissingUserId);
    }

    if request.literal_message().is_none() && request.template_name().is_none() {
        return Err(ValidationError::MissingContent);
    }

    Ok(())
}
