use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::DbBackend;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_create_metrics"
    }
}

#[derive(DeriveIden)]
enum MetricTypes {
    Table,
    Id,
    Name,
}

#[derive(DeriveIden)]
enum Metrics {
    Table,
    Id,
    Name,
    TypeId,
    Value,
}

const SEED_SQL: &str = "
INSERT INTO metric_types (name) VALUES ('gauge'), ('counter')
ON CONFLICT (name) DO NOTHING;
";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MetricTypes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MetricTypes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MetricTypes::Name)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .to_owned(),
            )
            .await?;

        // sqlite only auto-increments a plain INTEGER primary key
        let mut id = ColumnDef::new(Metrics::Id);
        match manager.get_database_backend() {
            DbBackend::Sqlite => id.integer(),
            _ => id.big_integer(),
        };
        id.not_null().auto_increment().primary_key();

        manager
            .create_table(
                Table::create()
                    .table(Metrics::Table)
                    .if_not_exists()
                    .col(&mut id)
                    .col(ColumnDef::new(Metrics::Name).string().not_null())
                    .col(ColumnDef::new(Metrics::TypeId).integer().not_null())
                    .col(ColumnDef::new(Metrics::Value).double().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_metrics_type_id")
                            .from(Metrics::Table, Metrics::TypeId)
                            .to(MetricTypes::Table, MetricTypes::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("metric_name_idx")
                    .table(Metrics::Table)
                    .col(Metrics::Name)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager.get_connection().execute_unprepared(SEED_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Metrics::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MetricTypes::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}
