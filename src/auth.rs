use tracing::warn;

use crate::{error::AppError, models::Member};

pub fn verify_member_pin(member: &Member, pin: &str) -> Result<(), AppError> {
    if member.pin.is_empty() || member.pin != pin.trim() {
        warn!(member_id = %member.id, "member PIN mismatch");
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_pin_is_accepted() {
        let member = Member::new("Mika", "1234");
        assert!(verify_member_pin(&member, "1234").is_ok());
        assert!(verify_member_pin(&member, " 1234 ").is_ok());
    }

    #[test]
    fn wrong_or_missing_pin_is_rejected() {
        let mut member = Member::new("Mika", "1234");
        assert!(matches!(
            verify_member_pin(&member, "0000"),
            Err(AppError::Unauthorized)
        ));
        member.pin.clear();
        assert!(matches!(
            verify_member_pin(&member, ""),
            Err(AppError::Unauthorized)
        ));
    }
}
