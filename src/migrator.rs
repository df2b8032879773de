use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_inventory_tables::Migration),
            Box::new(m20240601_000002_create_service_orders_table::Migration),
            Box::new(m20240601_000003_create_service_order_lines_tables::Migration),
            Box::new(m20240601_000004_create_service_order_payments_table::Migration),
        ]
    }
}

mod m20240601_000001_create_inventory_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_inventory_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryStock::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(InventoryStock::ProductId).uuid().not_null())
                        .col(ColumnDef::new(InventoryStock::SiteId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryStock::Available)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(InventoryStock::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .primary_key(
                            Index::create()
                                .col(InventoryStock::ProductId)
                                .col(InventoryStock::SiteId),
                        )
                        .check(Expr::col(InventoryStock::Available).gte(0))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::ProductId).uuid().not_null())
                        .col(ColumnDef::new(InventoryMovements::SiteId).uuid().not_null())
                        .col(ColumnDef::new(InventoryMovements::Delta).integer().not_null())
                        .col(
                            ColumnDef::new(InventoryMovements::Reason)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryMovements::ServiceOrderId).uuid().null())
                        .col(ColumnDef::new(InventoryMovements::LineId).uuid().null())
                        .col(
                            ColumnDef::new(InventoryMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_movements_service_order_id")
                        .table(InventoryMovements::Table)
                        .col(InventoryMovements::ServiceOrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderNumberSequences::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderNumberSequences::SiteId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderNumberSequences::LastValue)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderNumberSequences::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryMovements::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryStock::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryStock {
        Table,
        ProductId,
        SiteId,
        Available,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryMovements {
        Table,
        Id,
        ProductId,
        SiteId,
        Delta,
        Reason,
        ServiceOrderId,
        LineId,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderNumberSequences {
        Table,
        SiteId,
        LastValue,
    }
}

mod m20240601_000002_create_service_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_service_orders_table"
        }
    }

    fn money(col: ServiceOrders) -> ColumnDef {
        ColumnDef::new(col)
            .big_integer()
            .not_null()
            .default(0)
            .to_owned()
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ServiceOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ServiceOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::OrderNumber)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ServiceOrders::SiteId).uuid().not_null())
                        .col(ColumnDef::new(ServiceOrders::ClientId).uuid().not_null())
                        .col(ColumnDef::new(ServiceOrders::TechnicianId).uuid().null())
                        .col(
                            ColumnDef::new(ServiceOrders::ServiceKind)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::Priority)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(ServiceOrders::Status).string_len(24).not_null())
                        .col(ColumnDef::new(ServiceOrders::Equipment).json().not_null())
                        .col(ColumnDef::new(ServiceOrders::Diagnosis).text().null())
                        .col(ColumnDef::new(ServiceOrders::Solution).text().null())
                        .col(ColumnDef::new(ServiceOrders::Photos).json().not_null())
                        .col(ColumnDef::new(ServiceOrders::Addons).json().not_null())
                        .col(&mut money(ServiceOrders::ServiceCostCents))
                        .col(&mut money(ServiceOrders::PartsCostCents))
                        .col(&mut money(ServiceOrders::AddonsCostCents))
                        .col(&mut money(ServiceOrders::TotalCents))
                        .col(&mut money(ServiceOrders::PaidCents))
                        .col(&mut money(ServiceOrders::BalanceCents))
                        .col(&mut money(ServiceOrders::SalesTotalCents))
                        .col(
                            ColumnDef::new(ServiceOrders::SalesPaymentMethod)
                                .string_len(32)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::WarrantyDays)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::EstimatedDeliveryAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::RepairedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::DeliveredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::LastPaymentAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(ServiceOrders::Receiver).json().null())
                        .col(
                            ColumnDef::new(ServiceOrders::PendingSettlement)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(ServiceOrders::Cancellation).json().null())
                        .col(
                            ColumnDef::new(ServiceOrders::IntakeKey)
                                .string_len(128)
                                .null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(ServiceOrders::RepairKey).string_len(128).null())
                        .col(ColumnDef::new(ServiceOrders::CreatedBy).uuid().not_null())
                        .col(
                            ColumnDef::new(ServiceOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_service_orders_site_order_number")
                        .table(ServiceOrders::Table)
                        .col(ServiceOrders::SiteId)
                        .col(ServiceOrders::OrderNumber)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_service_orders_site_status")
                        .table(ServiceOrders::Table)
                        .col(ServiceOrders::SiteId)
                        .col(ServiceOrders::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_service_orders_client_id")
                        .table(ServiceOrders::Table)
                        .col(ServiceOrders::ClientId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ServiceOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden, Clone, Copy)]
    pub(super) enum ServiceOrders {
        Table,
        Id,
        OrderNumber,
        SiteId,
        ClientId,
        TechnicianId,
        ServiceKind,
        Priority,
        Status,
        Equipment,
        Diagnosis,
        Solution,
        Photos,
        Addons,
        ServiceCostCents,
        PartsCostCents,
        AddonsCostCents,
        TotalCents,
        PaidCents,
        BalanceCents,
        SalesTotalCents,
        SalesPaymentMethod,
        WarrantyDays,
        ReceivedAt,
        EstimatedDeliveryAt,
        RepairedAt,
        DeliveredAt,
        LastPaymentAt,
        CancelledAt,
        Receiver,
        PendingSettlement,
        Cancellation,
        IntakeKey,
        RepairKey,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
        Version,
    }
}

mod m20240601_000003_create_service_order_lines_tables {

    use super::m20240601_000002_create_service_orders_table::ServiceOrders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_service_order_lines_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ServiceOrderPartLines::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ServiceOrderPartLines::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPartLines::ServiceOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPartLines::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPartLines::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPartLines::UnitPriceCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPartLines::SubtotalCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPartLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPartLines::RestoredAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_part_lines_service_order")
                                .from(
                                    ServiceOrderPartLines::Table,
                                    ServiceOrderPartLines::ServiceOrderId,
                                )
                                .to(ServiceOrders::Table, ServiceOrders::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_part_lines_service_order_id")
                        .table(ServiceOrderPartLines::Table)
                        .col(ServiceOrderPartLines::ServiceOrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(ServiceOrderSaleItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ServiceOrderSaleItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderSaleItems::ServiceOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderSaleItems::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderSaleItems::Quantity)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderSaleItems::UnitPriceCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderSaleItems::SubtotalCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderSaleItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_items_service_order")
                                .from(
                                    ServiceOrderSaleItems::Table,
                                    ServiceOrderSaleItems::ServiceOrderId,
                                )
                                .to(ServiceOrders::Table, ServiceOrders::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sale_items_service_order_id")
                        .table(ServiceOrderSaleItems::Table)
                        .col(ServiceOrderSaleItems::ServiceOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ServiceOrderSaleItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(ServiceOrderPartLines::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ServiceOrderPartLines {
        Table,
        Id,
        ServiceOrderId,
        ProductId,
        Quantity,
        UnitPriceCents,
        SubtotalCents,
        CreatedAt,
        RestoredAt,
    }

    #[derive(DeriveIden)]
    enum ServiceOrderSaleItems {
        Table,
        Id,
        ServiceOrderId,
        ProductId,
        Quantity,
        UnitPriceCents,
        SubtotalCents,
        CreatedAt,
    }
}

mod m20240601_000004_create_service_order_payments_table {

    use super::m20240601_000002_create_service_orders_table::ServiceOrders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_service_order_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ServiceOrderPayments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ServiceOrderPayments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPayments::ServiceOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPayments::Kind)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPayments::AmountCents)
                                .big_integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPayments::Method)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPayments::IdempotencyKey)
                                .string_len(128)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPayments::RecordedBy)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ServiceOrderPayments::RecordedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_service_order")
                                .from(
                                    ServiceOrderPayments::Table,
                                    ServiceOrderPayments::ServiceOrderId,
                                )
                                .to(ServiceOrders::Table, ServiceOrders::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_order_idempotency_key")
                        .table(ServiceOrderPayments::Table)
                        .col(ServiceOrderPayments::ServiceOrderId)
                        .col(ServiceOrderPayments::IdempotencyKey)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ServiceOrderPayments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ServiceOrderPayments {
        Table,
        Id,
        ServiceOrderId,
        Kind,
        AmountCents,
        Method,
        IdempotencyKey,
        RecordedBy,
        RecordedAt,
    }
}
