use crate::StoreError;

pub const EMAIL_MAX_LENGTH: usize = 254;
const PHONE_MAX_LENGTH: usize = 17;

/// Normalizes an email address by lowercasing its domain part.
///
/// The local part is kept as-is: `Test@EXAMPLE.COM` becomes `Test@example.com`.
pub fn normalize_email(email: &str) -> String {
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_lowercase()),
        None => email.to_owned(),
    }
}

pub fn validate_email(email: &str) -> Result<(), StoreError> {
    if email.is_empty() {
        return Err(StoreError::invalid("email", "the email field must be set"));
    }

    if email.len() > EMAIL_MAX_LENGTH {
        return Err(StoreError::invalid("email", "email address is too long"));
    }

    let Some((local, domain)) = email.rsplit_once('@') else {
        return Err(StoreError::invalid("email", "missing @ separator"));
    };

    if local.is_empty() || domain.is_empty() {
        return Err(StoreError::invalid("email", "missing local or domain part"));
    }

    if domain.contains('@') || email.chars().any(char::is_whitespace) {
        return Err(StoreError::invalid("email", "malformed address"));
    }

    if !domain.split('.').all(|label| {
        !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    }) {
        return Err(StoreError::invalid("email", "malformed domain"));
    }

    Ok(())
}

/// Validates a phone number in international format: an optional `+`,
/// an optional country prefix `1`, then 9 to 15 digits.
pub fn validate_phone_number(phone: &str) -> Result<(), StoreError> {
    const MESSAGE: &str = "phone number must be entered in the format \"+999999999\", up to 15 digits allowed";

    if phone.len() > PHONE_MAX_LENGTH {
        return Err(StoreError::invalid("phone_number", MESSAGE));
    }

    let rest = phone.strip_prefix('+').unwrap_or(phone);
    let rest = rest.strip_prefix('1').unwrap_or(rest);

    if !rest.chars().all(|c| c.is_ascii_digit()) || !(9..=15).contains(&rest.len()) {
        return Err(StoreError::invalid("phone_number", MESSAGE));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Test@EXAMPLE.COM", "Test@example.com")]
    #[case("user@Example.Org", "user@example.org")]
    #[case("already@lower.case", "already@lower.case")]
    fn email_normalization_lowercases_domain_only(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_email(input), expected);
    }

    #[test]
    fn empty_email_is_rejected() {
        let error = validate_email("").expect_err("empty email must be invalid");
        assert!(error.to_string().contains("the email field must be set"));
    }

    #[rstest]
    #[case("user@example.com")]
    #[case("first.last@sub.example.org")]
    #[case("UPPER@EXAMPLE.COM")]
    fn valid_emails_pass(#[case] email: &str) {
        validate_email(email).expect("valid email");
    }

    #[rstest]
    #[case("no-at-sign")]
    #[case("@example.com")]
    #[case("user@")]
    #[case("user name@example.com")]
    #[case("user@exa mple.com")]
    #[case("user@bad_domain.com")]
    fn invalid_emails_fail(#[case] email: &str) {
        validate_email(email).expect_err("invalid email");
    }

    #[rstest]
    #[case("+6281234567890")]
    #[case("081234567890")]
    #[case("123456789")]
    #[case("+1123456789")]
    fn valid_phone_numbers_pass(#[case] phone: &str) {
        validate_phone_number(phone).expect("valid phone number");
    }

    #[rstest]
    #[case("12345678")] // too short
    #[case("+62812345678901234")] // too long
    #[case("phone-number")]
    #[case("0812 345 678")]
    fn invalid_phone_numbers_fail(#[case] phone: &str) {
        validate_phone_number(phone).expect_err("invalid phone number");
    }
}
