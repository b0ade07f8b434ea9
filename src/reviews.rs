use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::debug;

use crate::{
    db,
    entities::{comment, review, title, user},
    error::{AppError, AppResult, FieldErrors, NON_FIELD_ERRORS},
    models::{CommentRead, CommentWrite, Field, Page, ReviewRead, ReviewWrite},
    validators::{self, RuleViolation},
};

const TEXT_MAX_LENGTH: usize = 10_000;

pub async fn find_title(db: &DatabaseConnection, title_id: i32) -> AppResult<title::Model> {
    title::Entity::find_by_id(title_id).one(db).await?.ok_or(AppError::NotFound)
}

/// A review only resolves under the title it was written for.
pub async fn find_review(
    db: &DatabaseConnection,
    title_id: i32,
    review_id: i32,
) -> AppResult<review::Model> {
    review::Entity::find_by_id(review_id)
        .filter(review::Column::TitleId.eq(title_id))
        .one(db)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn find_comment(
    db: &DatabaseConnection,
    review_id: i32,
    comment_id: i32,
) -> AppResult<comment::Model> {
    comment::Entity::find_by_id(comment_id)
        .filter(comment::Column::ReviewId.eq(review_id))
        .one(db)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn list_reviews(
    db: &DatabaseConnection,
    title_id: i32,
    index: u64,
    page_size: u64,
) -> AppResult<Page<ReviewRead>> {
    find_title(db, title_id).await?;
    let query = review::Entity::find()
        .filter(review::Column::TitleId.eq(title_id))
        .order_by_desc(review::Column::PubDate)
        .order_by_desc(review::Column::Id)
        .find_also_related(user::Entity);
    let page = db::fetch_page(db, query, index, page_size).await?;
    Ok(page.map(|(review, author)| ReviewRead::new(review, author)))
}

pub async fn read_review(db: &DatabaseConnection, review: review::Model) -> AppResult<ReviewRead> {
    let author = review.find_related(user::Entity).one(db).await?;
    Ok(ReviewRead::new(review, author))
}

fn check_text(
    errors: &mut FieldErrors,
    text: Option<Field<String>>,
    required: bool,
) -> Option<String> {
    let text = errors.take("text", text, required)?;
    errors.check("text", validators::validate_text(&text, TEXT_MAX_LENGTH).map(|()| text))
}

fn check_score(
    errors: &mut FieldErrors,
    score: Option<Field<i64>>,
    required: bool,
) -> Option<i16> {
    let score = errors.take("score", score, required)?;
    errors.check("score", validators::validate_score(score))
}

/// One review per (author, title) is enforced by the unique index; a losing
/// concurrent insert surfaces as `DuplicateReview` like a sequential one.
pub async fn create_review(
    db: &DatabaseConnection,
    author: &user::Model,
    title: &title::Model,
    input: ReviewWrite,
) -> AppResult<ReviewRead> {
    let mut errors = FieldErrors::new();
    let text = check_text(&mut errors, input.text, true);
    let score = check_score(&mut errors, input.score, true);
    errors.into_result()?;
    let (Some(text), Some(score)) = (text, score) else {
        return Err(AppError::Validation(FieldErrors::new()));
    };

    let inserted = review::ActiveModel {
        author_id: Set(author.id),
        title_id: Set(title.id),
        score: Set(score),
        text: Set(text),
        pub_date: Set(now_sec()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(AppError::from);

    let created = match inserted {
        Err(AppError::Conflict(_)) => {
            debug!(author = %author.username, title_id = title.id, "duplicate review rejected");
            return Err(AppError::field(NON_FIELD_ERRORS, RuleViolation::DuplicateReview));
        },
        other => other?,
    };

    debug!(review_id = created.id, title_id = title.id, "review created");
    Ok(ReviewRead::new(created, Some(author.clone())))
}

/// Partial update; author and title never change, and the one-per-title
/// check does not apply.
pub async fn update_review(
    db: &DatabaseConnection,
    review: review::Model,
    input: ReviewWrite,
) -> AppResult<ReviewRead> {
    let mut errors = FieldErrors::new();
    let text = check_text(&mut errors, input.text, false);
    let score = check_score(&mut errors, input.score, false);
    errors.into_result()?;

    if text.is_none() && score.is_none() {
        return read_review(db, review).await;
    }
    let mut active: review::ActiveModel = review.into();
    if let Some(text) = text {
        active.text = Set(text);
    }
    if let Some(score) = score {
        active.score = Set(score);
    }
    let updated = active.update(db).await?;
    read_review(db, updated).await
}

pub async fn delete_review(db: &DatabaseConnection, review: review::Model) -> AppResult<()> {
    let id = review.id;
    review.delete(db).await?;
    debug!(review_id = id, "review deleted");
    Ok(())
}

pub async fn list_comments(
    db: &DatabaseConnection,
    review: &review::Model,
    index: u64,
    page_size: u64,
) -> AppResult<Page<CommentRead>> {
    let query = comment::Entity::find()
        .filter(comment::Column::ReviewId.eq(review.id))
        .order_by_desc(comment::Column::PubDate)
        .order_by_desc(comment::Column::Id)
        .find_also_related(user::Entity);
    let page = db::fetch_page(db, query, index, page_size).await?;
    Ok(page.map(|(comment, author)| CommentRead::new(comment, author)))
}

pub async fn read_comment(
    db: &DatabaseConnection,
    comment: comment::Model,
) -> AppResult<CommentRead> {
    let author = comment.find_related(user::Entity).one(db).await?;
    Ok(CommentRead::new(comment, author))
}

pub async fn create_comment(
    db: &DatabaseConnection,
    author: &user::Model,
    review: &review::Model,
    input: CommentWrite,
) -> AppResult<CommentRead> {
    let mut errors = FieldErrors::new();
    let text = check_text(&mut errors, input.text, true);
    errors.into_result()?;
    let Some(text) = text else {
        return Err(AppError::Validation(FieldErrors::new()));
    };

    let created = comment::ActiveModel {
        author_id: Set(author.id),
        review_id: Set(review.id),
        text: Set(text),
        pub_date: Set(now_sec()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    debug!(comment_id = created.id, review_id = review.id, "comment created");
    Ok(CommentRead::new(created, Some(author.clone())))
}

pub async fn update_comment(
    db: &DatabaseConnection,
    comment: comment::Model,
    input: CommentWrite,
) -> AppResult<CommentRead> {
    let mut errors = FieldErrors::new();
    let text = check_text(&mut errors, input.text, false);
    errors.into_result()?;

    let Some(text) = text else {
        return read_comment(db, comment).await;
    };
    let mut active: comment::ActiveModel = comment.into();
    active.text = Set(text);
    let updated = active.update(db).await?;
    read_comment(db, updated).await
}

pub async fn delete_comment(db: &DatabaseConnection, comment: comment::Model) -> AppResult<()> {
    let id = comment.id;
    comment.delete(db).await?;
    debug!(comment_id = id, "comment deleted");
    Ok(())
}

fn now_sec() -> i64 {
    jiff::Timestamp::now().as_second()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        policy::Role,
        tests::{insert_user, memory_db},
    };

    async fn insert_title(db: &DatabaseConnection, name: &str) -> title::Model {
        title::ActiveModel { name: Set(name.into()), year: Set(2000), ..Default::default() }
            .insert(db)
            .await
            .unwrap()
    }

    fn write(score: i64, text: &str) -> ReviewWrite {
        ReviewWrite { score: Some(Field::Valid(score)), text: Some(Field::Valid(text.into())) }
    }

    #[tokio::test]
    async fn second_review_by_same_author_is_duplicate() {
        let db = memory_db().await;
        let alice = insert_user(&db, "alice", Role::User).await;
        let heat = insert_title(&db, "Heat").await;

        create_review(&db, &alice, &heat, write(7, "good")).await.unwrap();
        let err = create_review(&db, &alice, &heat, write(3, "changed my mind")).await.unwrap_err();
        let AppError::Validation(errors) = err else { panic!("expected validation error") };
        assert_eq!(
            errors.get(NON_FIELD_ERRORS),
            Some(&[RuleViolation::DuplicateReview.to_string()][..])
        );
    }

    #[tokio::test]
    async fn same_author_may_review_other_titles_and_others_same_title() {
        let db = memory_db().await;
        let alice = insert_user(&db, "alice", Role::User).await;
        let bob = insert_user(&db, "bob", Role::User).await;
        let heat = insert_title(&db, "Heat").await;
        let ronin = insert_title(&db, "Ronin").await;

        create_review(&db, &alice, &heat, write(7, "good")).await.unwrap();
        create_review(&db, &alice, &ronin, write(8, "better")).await.unwrap();
        create_review(&db, &bob, &heat, write(5, "fine")).await.unwrap();
    }

    #[tokio::test]
    async fn editing_skips_duplicate_check() {
        let db = memory_db().await;
        let alice = insert_user(&db, "alice", Role::User).await;
        let heat = insert_title(&db, "Heat").await;
        let created = create_review(&db, &alice, &heat, write(7, "good")).await.unwrap();

        let review = find_review(&db, heat.id, created.id).await.unwrap();
        let input = ReviewWrite { score: Some(Field::Valid(9)), text: None };
        let updated = update_review(&db, review, input).await.unwrap();
        assert_eq!(updated.score, 9);
        assert_eq!(updated.text, "good");
        assert_eq!(updated.author, "alice");
    }

    #[tokio::test]
    async fn invalid_input_reports_every_field() {
        let db = memory_db().await;
        let alice = insert_user(&db, "alice", Role::User).await;
        let heat = insert_title(&db, "Heat").await;
        let input = ReviewWrite {
            score: Some(Field::Valid(11)),
            text: Some(Field::Valid("  ".into())),
        };
        let err = create_review(&db, &alice, &heat, input).await.unwrap_err();
        let AppError::Validation(errors) = err else { panic!("expected validation error") };
        assert!(errors.get("score").is_some());
        assert!(errors.get("text").is_some());
    }

    #[tokio::test]
    async fn review_lookup_is_scoped_to_title() {
        let db = memory_db().await;
        let alice = insert_user(&db, "alice", Role::User).await;
        let heat = insert_title(&db, "Heat").await;
        let ronin = insert_title(&db, "Ronin").await;
        let created = create_review(&db, &alice, &heat, write(7, "good")).await.unwrap();
        assert!(matches!(find_review(&db, ronin.id, created.id).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn reviews_and_comments_list_newest_first_and_cascade() {
        let db = memory_db().await;
        let alice = insert_user(&db, "alice", Role::User).await;
        let bob = insert_user(&db, "bob", Role::User).await;
        let heat = insert_title(&db, "Heat").await;
        let first = create_review(&db, &alice, &heat, write(7, "first")).await.unwrap();
        create_review(&db, &bob, &heat, write(5, "second")).await.unwrap();

        let listed = list_reviews(&db, heat.id, 0, 10).await.unwrap();
        let texts: Vec<_> = listed.results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["second", "first"]);

        let review = find_review(&db, heat.id, first.id).await.unwrap();
        for (author, text) in [(&bob, "agreed"), (&alice, "thanks")] {
            let input = CommentWrite { text: Some(Field::Valid(text.into())) };
            create_comment(&db, author, &review, input).await.unwrap();
        }
        let comments = list_comments(&db, &review, 0, 10).await.unwrap();
        assert_eq!(comments.count, 2);
        assert_eq!(comments.results[0].author, "alice");

        delete_review(&db, review).await.unwrap();
        assert_eq!(comment::Entity::find().all(&db).await.unwrap().len(), 0);

        user::Entity::delete_by_id(bob.id).exec(&db).await.unwrap();
        assert_eq!(review::Entity::find().all(&db).await.unwrap().len(), 0);
    }
}
