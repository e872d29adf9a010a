use sea_orm_migration::prelude::*;

#[derive(Iden)]
enum RolePermissions {
    Table,
    GrantorId,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(RolePermissions::Table)
                    .add_column(ColumnDef::new(RolePermissions::GrantorId).integer())
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(RolePermissions::Table)
                    .drop_column(RolePermissions::GrantorId)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
