//! 合作方配置表
//!
//! 由外部管理端维护，核心流程只读。

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Partners::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Partners::Id)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Partners::Name).string().not_null())
                    .col(ColumnDef::new(Partners::TargetDomain).string().null())
                    .col(ColumnDef::new(Partners::ClickidKeys).text().null())
                    .col(ColumnDef::new(Partners::SumKeys).text().null())
                    .col(ColumnDef::new(Partners::SumMapping).text().null())
                    .col(
                        ColumnDef::new(Partners::IpWhitelistEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Partners::AllowedIps).text().null())
                    .col(
                        ColumnDef::new(Partners::LoggingEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Partners::TelegramEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Partners::TelegramWhitelistEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Partners::TelegramWhitelistKeywords)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Partners::PartnerTelegramEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Partners::PartnerTelegramBotToken)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Partners::PartnerTelegramChannelId)
                            .string()
                            .null(),
                    )
                    .col(ColumnDef::new(Partners::GoogleSpreadsheetId).string().null())
                    .col(ColumnDef::new(Partners::GoogleSheetName).string().null())
                    .col(
                        ColumnDef::new(Partners::GoogleServiceAccountJson)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Partners::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Partners::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Partners::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Partners {
    #[sea_orm(iden = "partners")]
    Table,
    Id,
    Name,
    TargetDomain,
    ClickidKeys,
    SumKeys,
    SumMapping,
    IpWhitelistEnabled,
    AllowedIps,
    LoggingEnabled,
    TelegramEnabled,
    TelegramWhitelistEnabled,
    TelegramWhitelistKeywords,
    PartnerTelegramEnabled,
    PartnerTelegramBotToken,
    PartnerTelegramChannelId,
    GoogleSpreadsheetId,
    GoogleSheetName,
    GoogleServiceAccountJson,
    CreatedAt,
    UpdatedAt,
}
