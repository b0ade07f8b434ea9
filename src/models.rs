use jiff::Timestamp;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};

use crate::{
    entities::{comment, review, user},
    error::{AppError, AppResult},
    policy::Role,
};

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub count: u64,
    pub next: Option<u64>,
    pub previous: Option<u64>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            next: self.next,
            previous: self.previous,
            results: self.results.into_iter().map(f).collect(),
        }
    }
}

/// A body field that accepts any JSON value. A value of the wrong type is kept
/// as `Invalid` so it can be reported under its own field name alongside the
/// other validation errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Field<T> {
    Valid(T),
    Invalid(String),
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(match serde_json::from_value(raw) {
            Ok(value) => Field::Valid(value),
            Err(err) => Field::Invalid(err.to_string()),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
}

impl PageQuery {
    /// Zero-based index of the requested page.
    pub fn index(self) -> AppResult<u64> {
        match self.page.unwrap_or(1) {
            0 => Err(AppError::NotFound),
            page => Ok(page - 1),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub page: Option<u64>,
    pub search: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedSlug {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NamedSlugInput {
    pub name: Option<Field<String>>,
    pub slug: Option<Field<String>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TitleRead {
    pub id: i32,
    pub name: String,
    pub year: i32,
    pub description: Option<String>,
    pub rating: Option<i64>,
    pub category: Option<NamedSlug>,
    pub genre: Vec<NamedSlug>,
}

/// Title body for both create and partial update; category and genres are
/// referenced by slug.
#[derive(Debug, Default, Deserialize)]
pub struct TitleWrite {
    pub name: Option<Field<String>>,
    pub year: Option<Field<i32>>,
    pub description: Option<Field<String>>,
    pub category: Option<Field<String>>,
    pub genre: Option<Field<Vec<String>>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TitleQuery {
    pub page: Option<u64>,
    pub genre: Option<String>,
    pub category: Option<String>,
    pub name: Option<String>,
    pub year: Option<i32>,
    pub ordering: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TitleOrdering {
    Default,
    Name { descending: bool },
    Rating { descending: bool },
}

impl TitleOrdering {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim) {
            None | Some("") => Some(Self::Default),
            Some("name") => Some(Self::Name { descending: false }),
            Some("-name") => Some(Self::Name { descending: true }),
            Some("rating") => Some(Self::Rating { descending: false }),
            Some("-rating") => Some(Self::Rating { descending: true }),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewWrite {
    pub text: Option<Field<String>>,
    pub score: Option<Field<i64>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReviewRead {
    pub id: i32,
    pub author: String,
    pub title: i32,
    pub text: String,
    pub score: i16,
    pub pub_date: Timestamp,
}

impl ReviewRead {
    pub fn new(review: review::Model, author: Option<user::Model>) -> Self {
        Self {
            id: review.id,
            author: author.map(|u| u.username).unwrap_or_default(),
            title: review.title_id,
            text: review.text,
            score: review.score,
            pub_date: timestamp(review.pub_date),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentWrite {
    pub text: Option<Field<String>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommentRead {
    pub id: i32,
    pub author: String,
    pub review: i32,
    pub text: String,
    pub pub_date: Timestamp,
}

impl CommentRead {
    pub fn new(comment: comment::Model, author: Option<user::Model>) -> Self {
        Self {
            id: comment.id,
            author: author.map(|u| u.username).unwrap_or_default(),
            review: comment.review_id,
            text: comment.text,
            pub_date: timestamp(comment.pub_date),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserRead {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub role: Role,
}

impl From<user::Model> for UserRead {
    fn from(user: user::Model) -> Self {
        Self {
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            bio: user.bio,
            role: user.role,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserWrite {
    pub username: Option<Field<String>>,
    pub email: Option<Field<String>>,
    pub first_name: Option<Field<String>>,
    pub last_name: Option<Field<String>>,
    pub bio: Option<Field<String>>,
    pub role: Option<Field<Role>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignupRequest {
    pub email: Option<Field<String>>,
    pub username: Option<Field<String>>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct SignupResponse {
    pub email: String,
    pub username: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub username: Option<Field<String>>,
    pub confirmation_code: Option<Field<String>>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

fn timestamp(seconds: i64) -> Timestamp {
    Timestamp::from_second(seconds).unwrap_or(Timestamp::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_accepts_known_fields_only() {
        assert_eq!(TitleOrdering::parse(None), Some(TitleOrdering::Default));
        let rating_desc = TitleOrdering::Rating { descending: true };
        assert_eq!(TitleOrdering::parse(Some("-rating")), Some(rating_desc));
        let name_asc = TitleOrdering::Name { descending: false };
        assert_eq!(TitleOrdering::parse(Some("name")), Some(name_asc));
        assert_eq!(TitleOrdering::parse(Some("year")), None);
    }

    #[test]
    fn mistyped_fields_are_kept_per_field() {
        let input: ReviewWrite =
            serde_json::from_str(r#"{"text": "fine", "score": "ten"}"#).unwrap();
        assert_eq!(input.text, Some(Field::Valid("fine".to_string())));
        assert!(matches!(input.score, Some(Field::Invalid(_))));

        let input: UserWrite = serde_json::from_str(r#"{"role": "owner", "bio": null}"#).unwrap();
        assert!(matches!(input.role, Some(Field::Invalid(_))));
        assert_eq!(input.bio, None);
    }

    #[test]
    fn page_zero_is_not_found() {
        assert!(matches!(PageQuery { page: Some(0) }.index(), Err(AppError::NotFound)));
        assert_eq!(PageQuery::default().index().ok(), Some(0));
    }
}
