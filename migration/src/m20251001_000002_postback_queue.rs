//! Postback 队列表
//!
//! 入口只追加 pending 记录，队列处理器负责状态流转。

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PostbackQueue::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PostbackQueue::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PostbackQueue::PartnerId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PostbackQueue::Data).text().not_null())
                    .col(
                        ColumnDef::new(PostbackQueue::Status)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(PostbackQueue::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PostbackQueue::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PostbackQueue::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 批处理按 status 过滤并按 created_at 排序
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_postback_queue_status_created")
                    .table(PostbackQueue::Table)
                    .col(PostbackQueue::Status)
                    .col(PostbackQueue::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // 僵死回收与过期清理按 updated_at 扫描
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_postback_queue_status_updated")
                    .table(PostbackQueue::Table)
                    .col(PostbackQueue::Status)
                    .col(PostbackQueue::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_postback_queue_status_updated")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_postback_queue_status_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(PostbackQueue::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PostbackQueue {
    #[sea_orm(iden = "postback_queue")]
    Table,
    Id,
    PartnerId,
    Data,
    Status,
    RetryCount,
    CreatedAt,
    UpdatedAt,
}
