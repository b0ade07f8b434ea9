use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(pk_auto(User::Id))
                    .col(string_len_uniq(User::Username, 150))
                    .col(string_len_uniq(User::Email, 254))
                    .col(string_len_null(User::FirstName, 150))
                    .col(string_len_null(User::LastName, 150))
                    .col(text_null(User::Bio))
                    .col(string_len(User::Role, 16).default("user"))
                    .col(boolean(User::IsSuperuser).default(false))
                    .col(big_integer_null(User::LastLogin))
                    .col(big_integer(User::DateJoined))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(User::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
pub(crate) enum User {
    Table,
    Id,
    Username,
    Email,
    FirstName,
    LastName,
    Bio,
    Role,
    IsSuperuser,
    LastLogin,
    DateJoined,
}
