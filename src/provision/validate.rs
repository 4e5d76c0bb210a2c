//! Input checks for signup and signin.

use regex::Regex;

use super::error::ProvisionError;
use super::models::{Placement, SignupInput};

const MAX_SUBJECT_ID_LEN: usize = 64;
const MAX_NAME_LEN: usize = 100;
const MAX_PASSWORD_LEN: usize = 256;
const MAX_PLACEMENT_ID_LEN: usize = 64;

/// Signup input that passed every check, with normalized fields.
pub(super) struct Registration {
    pub(super) subject_id: String,
    pub(super) first_name: String,
    pub(super) last_name: Option<String>,
    pub(super) email: String,
    pub(super) password: String,
    pub(super) placement: Placement,
}

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

pub(crate) fn valid_subject_id(subject_id: &str) -> bool {
    subject_id.len() <= MAX_SUBJECT_ID_LEN
        && Regex::new(r"^[A-Za-z0-9_.\-]+$").is_ok_and(|regex| regex.is_match(subject_id))
}

fn invalid(reason: &str) -> ProvisionError {
    ProvisionError::InvalidInput(reason.to_string())
}

fn optional_field(
    value: Option<String>,
    max_len: usize,
    name: &str,
) -> Result<Option<String>, ProvisionError> {
    match value.map(|value| value.trim().to_string()) {
        Some(value) if value.is_empty() => Ok(None),
        Some(value) if value.chars().count() > max_len => {
            Err(invalid(&format!("{name} is too long")))
        }
        other => Ok(other),
    }
}

pub(super) fn signup(input: SignupInput) -> Result<Registration, ProvisionError> {
    let subject_id = input.subject_id.trim().to_string();
    if !valid_subject_id(&subject_id) {
        return Err(invalid("invalid subjectId"));
    }

    let first_name = input.first_name.trim().to_string();
    if first_name.is_empty() || first_name.chars().count() > MAX_NAME_LEN {
        return Err(invalid("invalid firstName"));
    }
    let last_name = optional_field(input.last_name, MAX_NAME_LEN, "lastName")?;

    let email = normalize_email(&input.email);
    if !valid_email(&email) {
        return Err(invalid("invalid email"));
    }

    check_password(&input.password)?;

    let placement = Placement {
        district_id: optional_field(
            input.placement.district_id,
            MAX_PLACEMENT_ID_LEN,
            "districtId",
        )?,
        sub_district_id: optional_field(
            input.placement.sub_district_id,
            MAX_PLACEMENT_ID_LEN,
            "subDistrictId",
        )?,
        facility_id: optional_field(
            input.placement.facility_id,
            MAX_PLACEMENT_ID_LEN,
            "facilityId",
        )?,
    };

    Ok(Registration {
        subject_id,
        first_name,
        last_name,
        email,
        password: input.password,
        placement,
    })
}

/// Returns the trimmed subject id when both fields are acceptable.
pub(super) fn signin(subject_id: &str, password: &str) -> Result<String, ProvisionError> {
    let subject_id = subject_id.trim();
    if !valid_subject_id(subject_id) {
        return Err(invalid("invalid subjectId"));
    }
    check_password(password)?;
    Ok(subject_id.to_string())
}

fn check_password(password: &str) -> Result<(), ProvisionError> {
    if password.is_empty() || password.len() > MAX_PASSWORD_LEN {
        return Err(invalid("invalid password"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> SignupInput {
        SignupInput {
            subject_id: " alice ".to_string(),
            first_name: "Alice".to_string(),
            last_name: Some("  ".to_string()),
            email: " A@X.com ".to_string(),
            password: "p1".to_string(),
            placement: Placement {
                district_id: Some("d1".to_string()),
                sub_district_id: Some(String::new()),
                facility_id: None,
            },
        }
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn signup_normalizes_fields() {
        let registration = signup(input());
        assert!(registration.is_ok());
        if let Ok(registration) = registration {
            assert_eq!(registration.subject_id, "alice");
            assert_eq!(registration.email, "a@x.com");
            assert_eq!(registration.last_name, None);
            assert_eq!(registration.placement.district_id.as_deref(), Some("d1"));
            assert_eq!(registration.placement.sub_district_id, None);
        }
    }

    #[test]
    fn signup_rejects_bad_fields() {
        let cases = [
            SignupInput {
                subject_id: "has space".to_string(),
                ..input()
            },
            SignupInput {
                first_name: " ".to_string(),
                ..input()
            },
            SignupInput {
                email: "nope".to_string(),
                ..input()
            },
            SignupInput {
                password: String::new(),
                ..input()
            },
            SignupInput {
                subject_id: "a".repeat(65),
                ..input()
            },
        ];
        for case in cases {
            assert!(matches!(signup(case), Err(ProvisionError::InvalidInput(_))));
        }
    }

    #[test]
    fn signin_requires_both_fields() {
        assert_eq!(signin(" bob ", "pw").ok().as_deref(), Some("bob"));
        assert!(matches!(signin("", "pw"), Err(ProvisionError::InvalidInput(_))));
        assert!(matches!(signin("bob", ""), Err(ProvisionError::InvalidInput(_))));
    }
}
