use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};
use uuid::Uuid;

use crate::password::PasswordHash;
use crate::validate::{normalize_email, validate_email, validate_phone_number};
use crate::StoreError;

/// Number of consecutive failed logins after which the account is locked.
pub const LOCKOUT_THRESHOLD: u32 = 5;

/// How long an account stays locked once the threshold is reached.
pub const LOCKOUT_DURATION: Duration = Duration::minutes(30);

/// Interface language choices offered to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Id,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Id => "id",
        }
    }
}

impl FromStr for Language {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Language::En),
            "id" => Ok(Language::Id),
            _ => Err(StoreError::invalid("preferred_language", "unknown language code")),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member of the user directory.
///
/// Email is the unique identifier; there is no separate username.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub date_of_birth: Option<Date>,

    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_verified: bool,

    pub date_joined: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
    pub email_verified_at: Option<OffsetDateTime>,

    pub preferred_language: Language,
    pub timezone: String,
    pub email_notifications: bool,
    pub marketing_emails: bool,

    pub password_hash: PasswordHash,
    pub password_changed_at: Option<OffsetDateTime>,
    pub failed_login_attempts: u32,
    pub account_locked_until: Option<OffsetDateTime>,
}

/// Payload for creating a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub date_of_birth: Option<Date>,
    pub preferred_language: Language,
    pub timezone: String,
    pub email_notifications: bool,
    pub marketing_emails: bool,
}

impl NewUser {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            first_name: String::new(),
            last_name: String::new(),
            phone_number: None,
            date_of_birth: None,
            preferred_language: Language::default(),
            timezone: "UTC".to_owned(),
            email_notifications: true,
            marketing_emails: false,
        }
    }
}

/// Patchable subset of the profile; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub date_of_birth: Option<Date>,
    pub preferred_language: Option<Language>,
    pub timezone: Option<String>,
    pub email_notifications: Option<bool>,
    pub marketing_emails: Option<bool>,
}

impl User {
    /// Builds a regular user: active, neither staff nor superuser.
    pub fn create(new_user: NewUser, now: OffsetDateTime) -> Result<Self, StoreError> {
        Self::build(new_user, now, false)
    }

    /// Builds a superuser: active, staff and superuser flags forced on.
    pub fn create_superuser(new_user: NewUser, now: OffsetDateTime) -> Result<Self, StoreError> {
        Self::build(new_user, now, true)
    }

    fn build(new_user: NewUser, now: OffsetDateTime, superuser: bool) -> Result<Self, StoreError> {
        validate_email(&new_user.email)?;
        let email = normalize_email(&new_user.email);

        if let Some(phone) = new_user.phone_number.as_deref() {
            validate_phone_number(phone)?;
        }

        let password_hash = PasswordHash::hash(&new_user.password)?;

        Ok(Self {
            id: Uuid::new_v4(),
            email,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            phone_number: new_user.phone_number,
            date_of_birth: new_user.date_of_birth,
            is_active: true,
            is_staff: superuser,
            is_superuser: superuser,
            is_verified: false,
            date_joined: now,
            last_login: None,
            email_verified_at: None,
            preferred_language: new_user.preferred_language,
            timezone: new_user.timezone,
            email_notifications: new_user.email_notifications,
            marketing_emails: new_user.marketing_emails,
            password_hash,
            password_changed_at: Some(now),
            failed_login_attempts: 0,
            account_locked_until: None,
        })
    }

    /// First and last name joined, falling back to the email address.
    pub fn full_name(&self) -> String {
        let full_name = format!("{} {}", self.first_name, self.last_name);
        let full_name = full_name.trim();

        if full_name.is_empty() {
            self.email.clone()
        } else {
            full_name.to_owned()
        }
    }

    /// First name, falling back to the email local part.
    pub fn short_name(&self) -> &str {
        if !self.first_name.is_empty() {
            &self.first_name
        } else {
            self.email.split('@').next().unwrap_or(&self.email)
        }
    }

    pub fn display_name(&self) -> String {
        self.full_name()
    }

    /// Uppercased initials, falling back to the first letter of the email.
    pub fn initials(&self) -> String {
        let first = self.first_name.chars().next();
        let last = self.last_name.chars().next();

        match (first, last) {
            (Some(f), Some(l)) => format!("{f}{l}").to_uppercase(),
            (Some(f), None) => f.to_uppercase().to_string(),
            _ => self
                .email
                .chars()
                .next()
                .map(|c| c.to_uppercase().to_string())
                .unwrap_or_default(),
        }
    }

    /// Age in completed years on the given day, when the birth date is known.
    pub fn age_on(&self, today: Date) -> Option<i32> {
        let birth = self.date_of_birth?;

        let not_yet_this_year =
            (u8::from(today.month()), today.day()) < (u8::from(birth.month()), birth.day());

        Some(today.year() - birth.year() - i32::from(not_yet_this_year))
    }

    pub fn is_birthday_on(&self, today: Date) -> bool {
        self.date_of_birth
            .map(|birth| (birth.month(), birth.day()) == (today.month(), today.day()))
            .unwrap_or(false)
    }

    pub fn is_account_locked(&self, now: OffsetDateTime) -> bool {
        self.account_locked_until.map(|until| now < until).unwrap_or(false)
    }

    pub fn lock_account(&mut self, now: OffsetDateTime, duration: Duration) {
        self.account_locked_until = Some(now + duration);
    }

    pub fn unlock_account(&mut self) {
        self.account_locked_until = None;
        self.failed_login_attempts = 0;
    }

    /// Counts a failed login attempt, locking the account at the threshold.
    pub fn register_login_failure(&mut self, now: OffsetDateTime) {
        self.failed_login_attempts += 1;

        if self.failed_login_attempts >= LOCKOUT_THRESHOLD {
            self.lock_account(now, LOCKOUT_DURATION);
        }
    }

    /// Resets the failure counter and stamps the login time.
    pub fn register_login_success(&mut self, now: OffsetDateTime) {
        self.failed_login_attempts = 0;
        self.last_login = Some(now);
    }

    pub fn verify_email(&mut self, now: OffsetDateTime) {
        self.is_verified = true;
        self.email_verified_at = Some(now);
    }

    pub fn set_password(&mut self, hash: PasswordHash, now: OffsetDateTime) {
        self.password_hash = hash;
        self.password_changed_at = Some(now);
    }

    pub fn apply_update(&mut self, update: ProfileUpdate) -> Result<(), StoreError> {
        if let Some(phone) = update.phone_number.as_deref() {
            validate_phone_number(phone)?;
        }

        if let Some(first_name) = update.first_name {
            self.first_name = first_name;
        }
        if let Some(last_name) = update.last_name {
            self.last_name = last_name;
        }
        if let Some(phone_number) = update.phone_number {
            self.phone_number = Some(phone_number);
        }
        if let Some(date_of_birth) = update.date_of_birth {
            self.date_of_birth = Some(date_of_birth);
        }
        if let Some(preferred_language) = update.preferred_language {
            self.preferred_language = preferred_language;
        }
        if let Some(timezone) = update.timezone {
            self.timezone = timezone;
        }
        if let Some(email_notifications) = update.email_notifications {
            self.email_notifications = email_notifications;
        }
        if let Some(marketing_emails) = update.marketing_emails {
            self.marketing_emails = marketing_emails;
        }

        Ok(())
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.email)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use super::*;

    fn sample_user() -> User {
        User::create(NewUser::new("user@example.com", "testpass123"), datetime!(2025-01-15 10:00 UTC))
            .expect("valid user")
    }

    #[test]
    fn create_user_defaults() {
        let user = sample_user();

        assert!(user.is_active);
        assert!(!user.is_staff);
        assert!(!user.is_superuser);
        assert!(!user.is_verified);
        assert_eq!(user.failed_login_attempts, 0);
        assert_eq!(user.timezone, "UTC");
        assert_eq!(user.preferred_language, Language::En);
        assert!(user.email_notifications);
        assert!(!user.marketing_emails);
        assert!(user.password_hash.verify("testpass123"));
    }

    #[test]
    fn create_superuser_forces_flags() {
        let user = User::create_superuser(
            NewUser::new("admin@example.com", "adminpass123"),
            datetime!(2025-01-15 10:00 UTC),
        )
        .expect("valid superuser");

        assert!(user.is_active);
        assert!(user.is_staff);
        assert!(user.is_superuser);
    }

    #[test]
    fn create_user_without_email_fails() {
        let error = User::create(NewUser::new("", "testpass123"), datetime!(2025-01-15 10:00 UTC))
            .expect_err("empty email");
        assert!(error.to_string().contains("the email field must be set"));
    }

    #[test]
    fn create_user_normalizes_email() {
        let user = User::create(
            NewUser::new("Test@EXAMPLE.COM", "testpass123"),
            datetime!(2025-01-15 10:00 UTC),
        )
        .expect("valid user");

        assert_eq!(user.email, "Test@example.com");
    }

    #[test]
    fn full_name_falls_back_to_email() {
        let mut user = sample_user();
        user.first_name = "John".to_owned();
        user.last_name = "Doe".to_owned();
        assert_eq!(user.full_name(), "John Doe");

        user.last_name.clear();
        assert_eq!(user.full_name(), "John");

        user.first_name.clear();
        assert_eq!(user.full_name(), "user@example.com");
    }

    #[test]
    fn short_name_falls_back_to_email_local_part() {
        let mut user = sample_user();
        user.first_name = "John".to_owned();
        assert_eq!(user.short_name(), "John");

        user.first_name.clear();
        assert_eq!(user.short_name(), "user");
    }

    #[test]
    fn initials_fallbacks() {
        let mut user = sample_user();
        user.first_name = "john".to_owned();
        user.last_name = "doe".to_owned();
        assert_eq!(user.initials(), "JD");

        user.last_name.clear();
        assert_eq!(user.initials(), "J");

        user.first_name.clear();
        assert_eq!(user.initials(), "U");
    }

    #[test]
    fn age_accounts_for_birthday_not_yet_passed() {
        let mut user = sample_user();
        user.date_of_birth = Some(date!(2000 - 06 - 15));

        assert_eq!(user.age_on(date!(2025 - 06 - 14)), Some(24));
        assert_eq!(user.age_on(date!(2025 - 06 - 15)), Some(25));
        assert_eq!(user.age_on(date!(2025 - 06 - 16)), Some(25));

        user.date_of_birth = None;
        assert_eq!(user.age_on(date!(2025 - 06 - 15)), None);
    }

    #[test]
    fn birthday_check() {
        let mut user = sample_user();
        user.date_of_birth = Some(date!(2000 - 06 - 15));

        assert!(user.is_birthday_on(date!(2025 - 06 - 15)));
        assert!(!user.is_birthday_on(date!(2025 - 06 - 16)));

        user.date_of_birth = None;
        assert!(!user.is_birthday_on(date!(2025 - 06 - 15)));
    }

    #[test]
    fn lockout_at_fifth_consecutive_failure() {
        let now = datetime!(2025-01-15 10:00 UTC);
        let mut user = sample_user();

        for attempt in 1..LOCKOUT_THRESHOLD {
            user.register_login_failure(now);
            assert_eq!(user.failed_login_attempts, attempt);
            assert!(!user.is_account_locked(now));
        }

        user.register_login_failure(now);
        assert_eq!(user.failed_login_attempts, LOCKOUT_THRESHOLD);
        assert!(user.is_account_locked(now));

        // The lock expires on its own.
        assert!(!user.is_account_locked(now + LOCKOUT_DURATION));

        user.unlock_account();
        assert!(!user.is_account_locked(now));
        assert_eq!(user.failed_login_attempts, 0);
    }

    #[test]
    fn login_success_resets_failures() {
        let now = datetime!(2025-01-15 10:00 UTC);
        let mut user = sample_user();

        user.register_login_failure(now);
        user.register_login_failure(now);
        user.register_login_success(now);

        assert_eq!(user.failed_login_attempts, 0);
        assert_eq!(user.last_login, Some(now));
    }

    #[test]
    fn email_verification_stamps_time() {
        let now = datetime!(2025-01-15 10:00 UTC);
        let mut user = sample_user();

        assert!(!user.is_verified);
        assert!(user.email_verified_at.is_none());

        user.verify_email(now);

        assert!(user.is_verified);
        assert_eq!(user.email_verified_at, Some(now));
    }

    #[test]
    fn profile_update_validates_phone() {
        let mut user = sample_user();

        let update = ProfileUpdate {
            phone_number: Some("not-a-number".to_owned()),
            ..ProfileUpdate::default()
        };
        user.apply_update(update).expect_err("invalid phone");

        let update = ProfileUpdate {
            first_name: Some("John".to_owned()),
            phone_number: Some("+6281234567890".to_owned()),
            marketing_emails: Some(true),
            ..ProfileUpdate::default()
        };
        user.apply_update(update).expect("valid update");

        assert_eq!(user.first_name, "John");
        assert_eq!(user.phone_number.as_deref(), Some("+6281234567890"));
        assert!(user.marketing_emails);
    }
}
