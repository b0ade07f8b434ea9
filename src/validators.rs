use std::sync::LazyLock;

use regex::Regex;

pub const USERNAME_MAX_LENGTH: usize = 150;
pub const EMAIL_MAX_LENGTH: usize = 254;
pub const NAME_MAX_LENGTH: usize = 256;
pub const SLUG_MAX_LENGTH: usize = 50;
pub const SCORE_RANGE: std::ops::RangeInclusive<i64> = 1..=10;

static USERNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9\-_.]{1,20}$").expect("username regex is valid")
});

static SLUG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-a-zA-Z0-9_]+$").expect("slug regex is valid"));

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s.]+(\.[^@\s.]+)+$").expect("email regex is valid")
});

/// A single domain rule that an input value broke.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RuleViolation {
    #[error("year {year} is later than the current year {current}")]
    InvalidYear { year: i32, current: i32 },
    #[error("\"me\" is not an allowed username")]
    ReservedUsername,
    #[error("\"{0}\" is not a valid username: a letter then 1-20 letters, digits or -_.")]
    InvalidUsernameFormat(String),
    #[error("enter a valid email address")]
    InvalidEmail,
    #[error("\"{0}\" is not a valid slug: use letters, digits, hyphens or underscores")]
    InvalidSlug(String),
    #[error("ensure this value is between 1 and 10")]
    ScoreOutOfRange,
    #[error("ensure this field has no more than {0} characters")]
    TooLong(usize),
    #[error("this field may not be blank")]
    Blank,
    #[error("only one review per title is allowed")]
    DuplicateReview,
}

pub fn current_year() -> i32 {
    let today: jiff::civil::Date = jiff::Zoned::now().into();
    i32::from(today.year())
}

pub fn validate_year(year: i32) -> Result<(), RuleViolation> {
    validate_year_against(year, current_year())
}

fn validate_year_against(year: i32, current: i32) -> Result<(), RuleViolation> {
    if year > current {
        return Err(RuleViolation::InvalidYear { year, current });
    }
    Ok(())
}

pub fn validate_username(name: &str) -> Result<(), RuleViolation> {
    if name.eq_ignore_ascii_case("me") {
        return Err(RuleViolation::ReservedUsername);
    }
    if !USERNAME_REGEX.is_match(name) {
        return Err(RuleViolation::InvalidUsernameFormat(name.to_string()));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), RuleViolation> {
    validate_text(email, EMAIL_MAX_LENGTH)?;
    if !EMAIL_REGEX.is_match(email) {
        return Err(RuleViolation::InvalidEmail);
    }
    Ok(())
}

pub fn validate_slug(slug: &str) -> Result<(), RuleViolation> {
    validate_text(slug, SLUG_MAX_LENGTH)?;
    if !SLUG_REGEX.is_match(slug) {
        return Err(RuleViolation::InvalidSlug(slug.to_string()));
    }
    Ok(())
}

pub fn validate_score(score: i64) -> Result<i16, RuleViolation> {
    if !SCORE_RANGE.contains(&score) {
        return Err(RuleViolation::ScoreOutOfRange);
    }
    Ok(score as i16)
}

/// Non-blank and within `max` characters.
pub fn validate_text(value: &str, max: usize) -> Result<(), RuleViolation> {
    if value.trim().is_empty() {
        return Err(RuleViolation::Blank);
    }
    if value.chars().count() > max {
        return Err(RuleViolation::TooLong(max));
    }
    Ok(())
}
