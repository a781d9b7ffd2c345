use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Images::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Images::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Images::ExternalId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Images::EntityType).string().not_null())
                    .col(ColumnDef::new(Images::EntityId).string().not_null())
                    .col(ColumnDef::new(Images::ImageType).string().not_null())
                    .col(ColumnDef::new(Images::OriginalName).string().not_null())
                    .col(ColumnDef::new(Images::MimeType).string().not_null())
                    .col(ColumnDef::new(Images::Extension).string().not_null())
                    .col(ColumnDef::new(Images::Size).big_integer().not_null())
                    .col(ColumnDef::new(Images::Width).integer())
                    .col(ColumnDef::new(Images::Height).integer())
                    .col(ColumnDef::new(Images::Storage).string().not_null())
                    .col(ColumnDef::new(Images::Path).string().not_null())
                    .col(ColumnDef::new(Images::Checksum).string().not_null())
                    .col(
                        ColumnDef::new(Images::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(Images::Table)
                    .col(Images::EntityType)
                    .col(Images::EntityId)
                    .name("idx_images_entity")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Images::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Images {
    Table,
    Id,
    ExternalId,
    EntityType,
    EntityId,
    ImageType,
    OriginalName,
    MimeType,
    Extension,
    Size,
    Width,
    Height,
    Storage,
    Path,
    Checksum,
    CreatedAt,
}
