use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    cli::run_cli(imagehub_images_migration::Migrator).await;
}
