use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, PaginatorTrait, SelectorTrait,
    Statement, sea_query::LikeExpr,
};

use crate::{
    error::{AppError, AppResult},
    models::Page,
};

const SQLITE_PRAGMAS: [&str; 3] =
    ["PRAGMA journal_mode=WAL", "PRAGMA synchronous=NORMAL", "PRAGMA foreign_keys=ON"];

pub async fn connect_and_migrate(database_url: &str) -> AppResult<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url);
    options.sqlx_logging(false);
    if database_url.contains(":memory:") {
        // Every pooled connection would otherwise open its own empty database.
        options.max_connections(1).min_connections(1);
    }
    let db = Database::connect(options).await?;

    for pragma in SQLITE_PRAGMAS {
        db.execute(Statement::from_string(db.get_database_backend(), pragma.to_string())).await?;
    }

    Migrator::up(&db, None).await?;
    tracing::debug!("migrations applied");
    Ok(db)
}

/// Fetches one page of `query`. `index` is zero-based; a page past the end is
/// `NotFound` unless the whole result set is empty.
pub async fn fetch_page<'db, C, Q>(
    db: &'db C,
    query: Q,
    index: u64,
    page_size: u64,
) -> AppResult<Page<<Q::Selector as SelectorTrait>::Item>>
where
    C: ConnectionTrait,
    Q: PaginatorTrait<'db, C>,
{
    let paginator = query.paginate(db, page_size);
    let count = paginator.num_items().await?;
    let pages = count.div_ceil(page_size);
    if index > 0 && index >= pages {
        return Err(AppError::NotFound);
    }
    let results = paginator.fetch_page(index).await?;
    let page = index + 1;
    Ok(Page {
        count,
        next: (page < pages).then_some(page + 1),
        previous: (index > 0).then_some(index),
        results,
    })
}

const LIKE_ESCAPE: char = '\\';

/// `LIKE` pattern matching `needle` anywhere in the column, with `%`, `_` and
/// the escape character in `needle` matched literally.
pub fn contains_literal(needle: &str) -> LikeExpr {
    LikeExpr::new(format!("%{}%", escape_like(needle))).escape(LIKE_ESCAPE)
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("dune"), "dune");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b\\c"), "a\\_b\\\\c");
    }
}
