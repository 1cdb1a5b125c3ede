//! 统计表
//!
//! - detailed_stats：每个逻辑事件一行，event_key 唯一
//! - summary_stats：每个合作方的累计计数

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DetailedStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DetailedStats::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DetailedStats::EventKey)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DetailedStats::PartnerId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DetailedStats::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DetailedStats::ClickId).string().null())
                    .col(ColumnDef::new(DetailedStats::Url).text().not_null())
                    .col(ColumnDef::new(DetailedStats::ClientIp).string_len(45).null())
                    .col(ColumnDef::new(DetailedStats::UserAgent).text().null())
                    .col(
                        ColumnDef::new(DetailedStats::Method)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DetailedStats::Sum).double().null())
                    .col(
                        ColumnDef::new(DetailedStats::SumMapping)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(DetailedStats::ExtraParams).text().not_null())
                    .col(
                        ColumnDef::new(DetailedStats::QueueId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DetailedStats::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DetailedStats::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 幂等 upsert 的唯一键
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_detailed_stats_event_key")
                    .table(DetailedStats::Table)
                    .col(DetailedStats::EventKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 单合作方时间序列查询
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_detailed_stats_partner_time")
                    .table(DetailedStats::Table)
                    .col(DetailedStats::PartnerId)
                    .col(DetailedStats::Timestamp)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SummaryStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SummaryStats::PartnerId)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SummaryStats::TotalRequests)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SummaryStats::SuccessfulRedirects)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SummaryStats::Errors)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SummaryStats::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SummaryStats::Table).to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_detailed_stats_partner_time")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("uq_detailed_stats_event_key").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(DetailedStats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DetailedStats {
    #[sea_orm(iden = "detailed_stats")]
    Table,
    Id,
    EventKey,
    PartnerId,
    Timestamp,
    ClickId,
    Url,
    ClientIp,
    UserAgent,
    Method,
    Sum,
    SumMapping,
    ExtraParams,
    QueueId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SummaryStats {
    #[sea_orm(iden = "summary_stats")]
    Table,
    PartnerId,
    TotalRequests,
    SuccessfulRedirects,
    Errors,
    UpdatedAt,
}
