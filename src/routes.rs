use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    AppState, accounts,
    catalog::{self, SlugCollection},
    entities::{category, genre, review},
    error::{AppError, AppResult},
    extract::{ApiJson, ApiPath, ApiQuery, CurrentUser},
    models::{
        CommentRead, CommentWrite, NamedSlug, NamedSlugInput, Page, PageQuery, ReviewRead,
        ReviewWrite, SearchQuery, SignupRequest, SignupResponse, TitleQuery, TitleRead, TitleWrite,
        TokenRequest, TokenResponse, UserRead, UserWrite,
    },
    policy::{self, Authorship, Operation, Resource},
    reviews,
};

type Body<T> = Result<ApiJson<T>, AppError>;

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/token", post(token))
        .route("/users", get(list_users).post(create_user))
        .route("/users/me", get(me).patch(update_me))
        .route("/users/{username}", get(get_user).patch(update_user).delete(delete_user))
        .route(
            "/categories",
            get(list_collection::<category::Entity>).post(create_in_collection::<category::Entity>),
        )
        .route(
            "/categories/{slug}",
            axum::routing::delete(delete_from_collection::<category::Entity>),
        )
        .route(
            "/genres",
            get(list_collection::<genre::Entity>).post(create_in_collection::<genre::Entity>),
        )
        .route("/genres/{slug}", axum::routing::delete(delete_from_collection::<genre::Entity>))
        .route("/titles", get(list_titles).post(create_title))
        .route("/titles/{title_id}", get(get_title).patch(update_title).delete(delete_title))
        .route("/titles/{title_id}/reviews", get(list_reviews).post(create_review))
        .route(
            "/titles/{title_id}/reviews/{review_id}",
            get(get_review).patch(update_review).delete(delete_review),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/titles/{title_id}/reviews/{review_id}/comments/{comment_id}",
            get(get_comment).patch(update_comment).delete(delete_comment),
        );

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
}

fn page_index(page: Option<u64>) -> AppResult<u64> {
    PageQuery { page }.index()
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    body: Body<SignupRequest>,
) -> AppResult<Json<SignupResponse>> {
    let ApiJson(input) = body?;
    let response = accounts::signup(&state.db, &state.signer, &state.outbox, input).await?;
    Ok(Json(response))
}

pub async fn token(
    State(state): State<Arc<AppState>>,
    body: Body<TokenRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    let ApiJson(input) = body?;
    let response = accounts::exchange_token(&state.db, &state.signer, input).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

fn admin_only(user: &CurrentUser, op: Operation) -> AppResult<()> {
    policy::authorize(Some(user.actor()), Resource::Users, Authorship::NotApplicable, op)
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiQuery(q): ApiQuery<SearchQuery>,
) -> AppResult<Json<Page<UserRead>>> {
    admin_only(&user, Operation::Read)?;
    let index = page_index(q.page)?;
    let page =
        accounts::list_users(&state.db, q.search.as_deref(), index, state.config.page_size).await?;
    Ok(Json(page))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    body: Body<UserWrite>,
) -> AppResult<(StatusCode, Json<UserRead>)> {
    admin_only(&user, Operation::Create)?;
    let ApiJson(input) = body?;
    let created = accounts::create_user(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath(username): ApiPath<String>,
) -> AppResult<Json<UserRead>> {
    admin_only(&user, Operation::Read)?;
    let found = accounts::find_by_username(&state.db, &username).await?;
    Ok(Json(found.into()))
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath(username): ApiPath<String>,
    body: Body<UserWrite>,
) -> AppResult<Json<UserRead>> {
    admin_only(&user, Operation::Update)?;
    let ApiJson(input) = body?;
    let found = accounts::find_by_username(&state.db, &username).await?;
    Ok(Json(accounts::update_user(&state.db, found, input, true).await?))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath(username): ApiPath<String>,
) -> AppResult<StatusCode> {
    admin_only(&user, Operation::Delete)?;
    accounts::delete_user(&state.db, &username).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserRead> {
    Json(user.into())
}

pub async fn update_me(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    body: Body<UserWrite>,
) -> AppResult<Json<UserRead>> {
    let actor = user.actor();
    policy::authorize(Some(actor), Resource::Profile, Authorship::Own, Operation::Update)?;
    let ApiJson(input) = body?;
    let updated = accounts::update_user(&state.db, user.0, input, actor.is_admin()).await?;
    Ok(Json(updated))
}

fn catalog_write(user: &CurrentUser, op: Operation) -> AppResult<()> {
    policy::authorize(Some(user.actor()), Resource::Catalog, Authorship::NotApplicable, op)
}

pub async fn list_collection<E: SlugCollection>(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<SearchQuery>,
) -> AppResult<Json<Page<NamedSlug>>> {
    let index = page_index(q.page)?;
    let page =
        catalog::list_slugs::<E>(&state.db, q.search.as_deref(), index, state.config.page_size)
            .await?;
    Ok(Json(page))
}

pub async fn create_in_collection<E: SlugCollection>(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    body: Body<NamedSlugInput>,
) -> AppResult<(StatusCode, Json<NamedSlug>)> {
    catalog_write(&user, Operation::Create)?;
    let ApiJson(input) = body?;
    let created = catalog::create_slug::<E>(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_from_collection<E: SlugCollection>(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath(slug): ApiPath<String>,
) -> AppResult<StatusCode> {
    catalog_write(&user, Operation::Delete)?;
    catalog::delete_slug::<E>(&state.db, &slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_titles(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<TitleQuery>,
) -> AppResult<Json<Page<TitleRead>>> {
    let index = page_index(q.page)?;
    let page = catalog::list_titles(&state.db, q, index, state.config.page_size).await?;
    Ok(Json(page))
}

pub async fn get_title(
    State(state): State<Arc<AppState>>,
    ApiPath(title_id): ApiPath<i32>,
) -> AppResult<Json<TitleRead>> {
    Ok(Json(catalog::get_title(&state.db, title_id).await?))
}

pub async fn create_title(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    body: Body<TitleWrite>,
) -> AppResult<(StatusCode, Json<TitleRead>)> {
    catalog_write(&user, Operation::Create)?;
    let ApiJson(input) = body?;
    let created = catalog::create_title(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_title(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath(title_id): ApiPath<i32>,
    body: Body<TitleWrite>,
) -> AppResult<Json<TitleRead>> {
    catalog_write(&user, Operation::Update)?;
    let ApiJson(input) = body?;
    Ok(Json(catalog::update_title(&state.db, title_id, input).await?))
}

pub async fn delete_title(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath(title_id): ApiPath<i32>,
) -> AppResult<StatusCode> {
    catalog_write(&user, Operation::Delete)?;
    catalog::delete_title(&state.db, title_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    ApiPath(title_id): ApiPath<i32>,
    ApiQuery(q): ApiQuery<PageQuery>,
) -> AppResult<Json<Page<ReviewRead>>> {
    let page =
        reviews::list_reviews(&state.db, title_id, q.index()?, state.config.page_size).await?;
    Ok(Json(page))
}

pub async fn create_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath(title_id): ApiPath<i32>,
    body: Body<ReviewWrite>,
) -> AppResult<(StatusCode, Json<ReviewRead>)> {
    policy::authorize(
        Some(user.actor()),
        Resource::Content,
        Authorship::NotApplicable,
        Operation::Create,
    )?;
    let title = reviews::find_title(&state.db, title_id).await?;
    let ApiJson(input) = body?;
    let created = reviews::create_review(&state.db, &user.0, &title, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_review(
    State(state): State<Arc<AppState>>,
    ApiPath((title_id, review_id)): ApiPath<(i32, i32)>,
) -> AppResult<Json<ReviewRead>> {
    let review = reviews::find_review(&state.db, title_id, review_id).await?;
    Ok(Json(reviews::read_review(&state.db, review).await?))
}

/// Resolves a review and checks the caller may change it.
async fn editable_review(
    state: &AppState,
    user: &CurrentUser,
    title_id: i32,
    review_id: i32,
    op: Operation,
) -> AppResult<review::Model> {
    let review = reviews::find_review(&state.db, title_id, review_id).await?;
    let authorship = policy::authorship(user.0.id, review.author_id);
    policy::authorize(Some(user.actor()), Resource::Content, authorship, op)?;
    Ok(review)
}

pub async fn update_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath((title_id, review_id)): ApiPath<(i32, i32)>,
    body: Body<ReviewWrite>,
) -> AppResult<Json<ReviewRead>> {
    let review = editable_review(&state, &user, title_id, review_id, Operation::Update).await?;
    let ApiJson(input) = body?;
    Ok(Json(reviews::update_review(&state.db, review, input).await?))
}

pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath((title_id, review_id)): ApiPath<(i32, i32)>,
) -> AppResult<StatusCode> {
    let review = editable_review(&state, &user, title_id, review_id, Operation::Delete).await?;
    reviews::delete_review(&state.db, review).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    ApiPath((title_id, review_id)): ApiPath<(i32, i32)>,
    ApiQuery(q): ApiQuery<PageQuery>,
) -> AppResult<Json<Page<CommentRead>>> {
    let review = reviews::find_review(&state.db, title_id, review_id).await?;
    let page =
        reviews::list_comments(&state.db, &review, q.index()?, state.config.page_size).await?;
    Ok(Json(page))
}

pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath((title_id, review_id)): ApiPath<(i32, i32)>,
    body: Body<CommentWrite>,
) -> AppResult<(StatusCode, Json<CommentRead>)> {
    policy::authorize(
        Some(user.actor()),
        Resource::Content,
        Authorship::NotApplicable,
        Operation::Create,
    )?;
    let review = reviews::find_review(&state.db, title_id, review_id).await?;
    let ApiJson(input) = body?;
    let created = reviews::create_comment(&state.db, &user.0, &review, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_comment(
    State(state): State<Arc<AppState>>,
    ApiPath((title_id, review_id, comment_id)): ApiPath<(i32, i32, i32)>,
) -> AppResult<Json<CommentRead>> {
    let review = reviews::find_review(&state.db, title_id, review_id).await?;
    let comment = reviews::find_comment(&state.db, review.id, comment_id).await?;
    Ok(Json(reviews::read_comment(&state.db, comment).await?))
}

pub async fn update_comment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath((title_id, review_id, comment_id)): ApiPath<(i32, i32, i32)>,
    body: Body<CommentWrite>,
) -> AppResult<Json<CommentRead>> {
    let review = reviews::find_review(&state.db, title_id, review_id).await?;
    let comment = reviews::find_comment(&state.db, review.id, comment_id).await?;
    let authorship = policy::authorship(user.0.id, comment.author_id);
    policy::authorize(Some(user.actor()), Resource::Content, authorship, Operation::Update)?;
    let ApiJson(input) = body?;
    Ok(Json(reviews::update_comment(&state.db, comment, input).await?))
}

pub async fn delete_comment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    ApiPath((title_id, review_id, comment_id)): ApiPath<(i32, i32, i32)>,
) -> AppResult<StatusCode> {
    let review = reviews::find_review(&state.db, title_id, review_id).await?;
    let comment = reviews::find_comment(&state.db, review.id, comment_id).await?;
    let authorship = policy::authorship(user.0.id, comment.author_id);
    policy::authorize(Some(user.actor()), Resource::Content, authorship, Operation::Delete)?;
    reviews::delete_comment(&state.db, comment).await?;
    Ok(StatusCode::NO_CONTENT)
}
