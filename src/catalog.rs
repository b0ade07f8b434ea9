use std::collections::{HashMap, HashSet};

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    FromQueryResult, JoinType, QueryFilter, QueryOrder, QuerySelect, RelationTrait, Select, Set,
    TransactionTrait,
    sea_query::{Expr, Func, Order, Query, SimpleExpr},
};
use tracing::debug;

use crate::{
    db,
    entities::{category, genre, genre_title, review, title},
    error::{AppError, AppResult, FieldErrors},
    models::{
        Field, NamedSlug, NamedSlugInput, Page, TitleOrdering, TitleQuery, TitleRead, TitleWrite,
    },
    validators::{self, NAME_MAX_LENGTH, RuleViolation},
};

/// A table of `{name, slug}` rows; categories and genres share this shape.
pub trait SlugCollection: EntityTrait {
    type Active: ActiveModelTrait<Entity = Self> + Send;

    const LABEL: &'static str;

    fn name_column() -> Self::Column;
    fn slug_column() -> Self::Column;
    fn new_active(name: String, slug: String) -> Self::Active;
}

impl SlugCollection for category::Entity {
    type Active = category::ActiveModel;

    const LABEL: &'static str = "category";

    fn name_column() -> Self::Column {
        category::Column::Name
    }

    fn slug_column() -> Self::Column {
        category::Column::Slug
    }

    fn new_active(name: String, slug: String) -> Self::Active {
        category::ActiveModel { name: Set(name), slug: Set(slug), ..Default::default() }
    }
}

impl SlugCollection for genre::Entity {
    type Active = genre::ActiveModel;

    const LABEL: &'static str = "genre";

    fn name_column() -> Self::Column {
        genre::Column::Name
    }

    fn slug_column() -> Self::Column {
        genre::Column::Slug
    }

    fn new_active(name: String, slug: String) -> Self::Active {
        genre::ActiveModel { name: Set(name), slug: Set(slug), ..Default::default() }
    }
}

#[derive(Clone, Debug, FromQueryResult)]
pub struct SlugRow {
    pub id: i32,
    pub name: String,
    pub slug: String,
}

impl From<SlugRow> for NamedSlug {
    fn from(row: SlugRow) -> Self {
        NamedSlug { name: row.name, slug: row.slug }
    }
}

pub async fn list_slugs<E: SlugCollection>(
    db: &DatabaseConnection,
    search: Option<&str>,
    index: u64,
    page_size: u64,
) -> AppResult<Page<NamedSlug>> {
    let mut query = E::find().order_by_asc(E::name_column());
    if let Some(search) = search.map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(E::name_column().like(db::contains_literal(search)));
    }
    let page = db::fetch_page(db, query.into_model::<SlugRow>(), index, page_size).await?;
    Ok(page.map(NamedSlug::from))
}

pub async fn find_slug<E: SlugCollection, C: ConnectionTrait>(
    db: &C,
    slug: &str,
) -> AppResult<Option<SlugRow>> {
    Ok(E::find().filter(E::slug_column().eq(slug)).into_model::<SlugRow>().one(db).await?)
}

pub async fn create_slug<E: SlugCollection>(
    db: &DatabaseConnection,
    input: NamedSlugInput,
) -> AppResult<NamedSlug> {
    let mut errors = FieldErrors::new();
    let name = required(&mut errors, "name", input.name, |v| {
        validators::validate_text(v, NAME_MAX_LENGTH)
    });
    let slug = required(&mut errors, "slug", input.slug, validators::validate_slug);
    if let Some(slug) = &slug {
        if find_slug::<E, _>(db, slug).await?.is_some() {
            errors.add("slug", format!("{} with this slug already exists", E::LABEL));
        }
    }
    errors.into_result()?;
    let (Some(name), Some(slug)) = (name, slug) else {
        return Err(AppError::Validation(FieldErrors::new()));
    };

    E::insert(E::new_active(name.clone(), slug.clone())).exec(db).await?;
    debug!(kind = E::LABEL, slug = %slug, "created");
    Ok(NamedSlug { name, slug })
}

pub async fn delete_slug<E: SlugCollection>(db: &DatabaseConnection, slug: &str) -> AppResult<()> {
    let result = E::delete_many().filter(E::slug_column().eq(slug)).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }
    debug!(kind = E::LABEL, slug = %slug, "deleted");
    Ok(())
}

#[derive(Clone, Debug, FromQueryResult)]
struct TitleRow {
    id: i32,
    name: String,
    year: i32,
    description: Option<String>,
    category_id: Option<i32>,
    rating: Option<f64>,
}

/// Titles joined with the mean of their review scores, computed per query.
fn rated_titles() -> Select<title::Entity> {
    title::Entity::find()
        .column_as(
            SimpleExpr::from(Func::avg(Expr::col((review::Entity, review::Column::Score)))),
            "rating",
        )
        .join(JoinType::LeftJoin, title::Relation::Review.def())
        .group_by(title::Column::Id)
}

/// Integer mean, truncated toward zero.
fn rating(mean: Option<f64>) -> Option<i64> {
    mean.map(|m| m.trunc() as i64)
}

pub async fn list_titles(
    db: &DatabaseConnection,
    filter: TitleQuery,
    index: u64,
    page_size: u64,
) -> AppResult<Page<TitleRead>> {
    let Some(ordering) = TitleOrdering::parse(filter.ordering.as_deref()) else {
        return Err(AppError::Validation(FieldErrors::single(
            "ordering",
            "ordering must be one of name, -name, rating, -rating",
        )));
    };

    let mut query = rated_titles();
    if let Some(name) = filter.name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        query = query.filter(title::Column::Name.like(db::contains_literal(name)));
    }
    if let Some(year) = filter.year {
        query = query.filter(title::Column::Year.eq(year));
    }
    if let Some(slug) = filter.category.as_deref() {
        query = query.filter(
            title::Column::CategoryId.in_subquery(
                Query::select()
                    .column(category::Column::Id)
                    .from(category::Entity)
                    .and_where(category::Column::Slug.eq(slug))
                    .to_owned(),
            ),
        );
    }
    if let Some(slug) = filter.genre.as_deref() {
        query = query.filter(
            title::Column::Id.in_subquery(
                Query::select()
                    .column((genre_title::Entity, genre_title::Column::TitleId))
                    .from(genre_title::Entity)
                    .inner_join(
                        genre::Entity,
                        Expr::col((genre::Entity, genre::Column::Id))
                            .equals((genre_title::Entity, genre_title::Column::GenreId)),
                    )
                    .and_where(genre::Column::Slug.eq(slug))
                    .to_owned(),
            ),
        );
    }

    query = match ordering {
        TitleOrdering::Default => {
            query.order_by_desc(title::Column::Year).order_by_asc(title::Column::Name)
        },
        TitleOrdering::Name { descending } => {
            query.order_by(title::Column::Name, order(descending))
        },
        TitleOrdering::Rating { descending } => {
            query.order_by(Expr::cust("rating"), order(descending))
        },
    }
    .order_by_asc(title::Column::Id);

    let page = db::fetch_page(db, query.into_model::<TitleRow>(), index, page_size).await?;
    let results = hydrate(db, page.results).await?;
    Ok(Page { count: page.count, next: page.next, previous: page.previous, results })
}

fn order(descending: bool) -> Order {
    if descending { Order::Desc } else { Order::Asc }
}

pub async fn get_title<C: ConnectionTrait>(db: &C, id: i32) -> AppResult<TitleRead> {
    let row = rated_titles()
        .filter(title::Column::Id.eq(id))
        .into_model::<TitleRow>()
        .one(db)
        .await?
        .ok_or(AppError::NotFound)?;
    hydrate(db, vec![row]).await?.pop().ok_or(AppError::NotFound)
}

/// Attaches nested category and genre objects to a batch of title rows.
async fn hydrate<C: ConnectionTrait>(db: &C, rows: Vec<TitleRow>) -> AppResult<Vec<TitleRead>> {
    let category_ids: HashSet<i32> = rows.iter().filter_map(|r| r.category_id).collect();
    let categories: HashMap<i32, NamedSlug> = if category_ids.is_empty() {
        HashMap::new()
    } else {
        category::Entity::find()
            .filter(category::Column::Id.is_in(category_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|c| (c.id, NamedSlug { name: c.name, slug: c.slug }))
            .collect()
    };

    let title_ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
    let mut genres: HashMap<i32, Vec<NamedSlug>> = HashMap::new();
    if !title_ids.is_empty() {
        let links = genre_title::Entity::find()
            .filter(genre_title::Column::TitleId.is_in(title_ids))
            .find_also_related(genre::Entity)
            .order_by_asc(genre::Column::Name)
            .all(db)
            .await?;
        for (link, genre) in links {
            if let Some(genre) = genre {
                genres
                    .entry(link.title_id)
                    .or_default()
                    .push(NamedSlug { name: genre.name, slug: genre.slug });
            }
        }
    }

    Ok(rows
        .into_iter()
        .map(|row| TitleRead {
            id: row.id,
            name: row.name,
            year: row.year,
            description: row.description,
            rating: rating(row.rating),
            category: row.category_id.and_then(|id| categories.get(&id).cloned()),
            genre: genres.remove(&row.id).unwrap_or_default(),
        })
        .collect())
}

struct ValidatedTitle {
    name: Option<String>,
    year: Option<i32>,
    description: Option<String>,
    category_id: Option<i32>,
    genre_ids: Option<Vec<i32>>,
}

/// Field checks first, reporting every failure; slug references are resolved
/// only once the body is well formed.
async fn validate_title<C: ConnectionTrait>(
    db: &C,
    input: TitleWrite,
    creating: bool,
) -> AppResult<ValidatedTitle> {
    let mut errors = FieldErrors::new();

    let name = errors.take("name", input.name, creating);
    let name = name.and_then(|name| {
        errors.check("name", validators::validate_text(&name, NAME_MAX_LENGTH).map(|()| name))
    });
    let year = errors.take("year", input.year, creating);
    let year = year.and_then(|year| {
        errors.check("year", validators::validate_year(year).map(|()| year))
    });
    let description = errors.take("description", input.description, false);
    let category = errors.take("category", input.category, creating);
    if let Some(slug) = &category {
        errors.check("category", validators::validate_slug(slug));
    }
    let genre = errors.take("genre", input.genre, false);
    if let Some(slugs) = &genre {
        for slug in slugs {
            errors.check("genre", validators::validate_slug(slug));
        }
    }
    errors.into_result()?;

    let category_id = match &category {
        Some(slug) => {
            let row = find_slug::<category::Entity, _>(db, slug).await?;
            Some(row.ok_or(AppError::NotFound)?.id)
        },
        None => None,
    };
    let genre_ids = match &genre {
        Some(slugs) => {
            let mut ids = Vec::with_capacity(slugs.len());
            for slug in slugs {
                let row = find_slug::<genre::Entity, _>(db, slug).await?;
                let id = row.ok_or(AppError::NotFound)?.id;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            Some(ids)
        },
        None => None,
    };

    Ok(ValidatedTitle { name, year, description, category_id, genre_ids })
}

pub async fn create_title(db: &DatabaseConnection, input: TitleWrite) -> AppResult<TitleRead> {
    let valid = validate_title(db, input, true).await?;
    let (Some(name), Some(year)) = (valid.name, valid.year) else {
        return Err(AppError::Validation(FieldErrors::new()));
    };

    let txn = db.begin().await?;
    let created = title::ActiveModel {
        name: Set(name),
        year: Set(year),
        description: Set(valid.description),
        category_id: Set(valid.category_id),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    link_genres(&txn, created.id, valid.genre_ids.unwrap_or_default()).await?;
    let read = get_title(&txn, created.id).await?;
    txn.commit().await?;

    debug!(title_id = created.id, "title created");
    Ok(read)
}

pub async fn update_title(
    db: &DatabaseConnection,
    id: i32,
    input: TitleWrite,
) -> AppResult<TitleRead> {
    let existing = title::Entity::find_by_id(id).one(db).await?.ok_or(AppError::NotFound)?;
    let valid = validate_title(db, input, false).await?;

    let txn = db.begin().await?;
    let mut active: title::ActiveModel = existing.into();
    if let Some(name) = valid.name {
        active.name = Set(name);
    }
    if let Some(year) = valid.year {
        active.year = Set(year);
    }
    if let Some(description) = valid.description {
        active.description = Set(Some(description));
    }
    if let Some(category_id) = valid.category_id {
        active.category_id = Set(Some(category_id));
    }
    if active.is_changed() {
        active.update(&txn).await?;
    }
    if let Some(genre_ids) = valid.genre_ids {
        genre_title::Entity::delete_many()
            .filter(genre_title::Column::TitleId.eq(id))
            .exec(&txn)
            .await?;
        link_genres(&txn, id, genre_ids).await?;
    }
    let read = get_title(&txn, id).await?;
    txn.commit().await?;

    debug!(title_id = id, "title updated");
    Ok(read)
}

async fn link_genres<C: ConnectionTrait>(
    db: &C,
    title_id: i32,
    genre_ids: Vec<i32>,
) -> AppResult<()> {
    if genre_ids.is_empty() {
        return Ok(());
    }
    let links = genre_ids.into_iter().map(|genre_id| genre_title::ActiveModel {
        genre_id: Set(Some(genre_id)),
        title_id: Set(title_id),
        ..Default::default()
    });
    genre_title::Entity::insert_many(links).exec(db).await?;
    Ok(())
}

pub async fn delete_title(db: &DatabaseConnection, id: i32) -> AppResult<()> {
    let result = title::Entity::delete_by_id(id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }
    debug!(title_id = id, "title deleted");
    Ok(())
}

fn required(
    errors: &mut FieldErrors,
    field: &str,
    value: Option<Field<String>>,
    rule: impl Fn(&str) -> Result<(), RuleViolation>,
) -> Option<String> {
    let value = errors.take(field, value, true)?;
    errors.check(field, rule(&value).map(|()| value))
}
