// 订单存储
// 订单状态迁移是对 "是否已终态" 的原子检查并设置，回调与轮询两条对账路径并发时只有一方生效

use crate::error::GatewayError;
use crate::models::{Order, OrderState, Transition};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// 订单持久化接口
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// 写入新订单，订单号已存在时返回 `false` 且不做任何修改
    async fn insert(&self, order: &Order) -> Result<bool, GatewayError>;

    async fn get(&self, id: &str) -> Result<Option<Order>, GatewayError>;

    /// 按订单号和业务ID查询，空业务ID不参与匹配
    async fn get_by_business(&self, id: &str, business_ids: [&str; 3]) -> Result<Option<Order>, GatewayError>;

    /// 标记为已支付
    async fn mark_paid(
        &self,
        id: &str,
        trade_id: Option<String>,
        pay_time: DateTime<Utc>,
    ) -> Result<Transition, GatewayError>;

    /// 标记为已过期
    async fn mark_expired(&self, id: &str, message: &str) -> Result<Transition, GatewayError>;

    /// 标记为下单失败
    async fn mark_failed(&self, id: &str, message: &str) -> Result<Transition, GatewayError>;

    /// 所有未完成的链上订单 (用于重启后恢复轮询)
    async fn list_pending_crypto(&self) -> Result<Vec<Order>, GatewayError>;

    /// 已记录该交易号的订单
    async fn find_by_trade_id(&self, trade_id: &str) -> Result<Option<Order>, GatewayError>;
}

/// 内存订单存储
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在写锁内完成检查与迁移
    async fn transition<F>(&self, id: &str, apply: F) -> Result<Transition, GatewayError>
    where
        F: FnOnce(&mut Order) + Send,
    {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(id)
            .ok_or_else(|| GatewayError::OrderNotFound(id.to_string()))?;

        if order.is_terminal() {
            return Ok(Transition::AlreadyTerminal(order.clone()));
        }

        apply(order);
        order.update_time = Utc::now();
        Ok(Transition::Applied(order.clone()))
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<bool, GatewayError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Ok(false);
        }
        orders.insert(order.id.clone(), order.clone());
        Ok(true)
    }

    async fn get(&self, id: &str) -> Result<Option<Order>, GatewayError> {
        Ok(self.orders.read().await.get(id).cloned())
    }

    async fn get_by_business(&self, id: &str, business_ids: [&str; 3]) -> Result<Option<Order>, GatewayError> {
        Ok(self
            .orders
            .read()
            .await
            .get(id)
            .filter(|order| order.matches_business_ids(business_ids))
            .cloned())
    }

    async fn mark_paid(
        &self,
        id: &str,
        trade_id: Option<String>,
        pay_time: DateTime<Utc>,
    ) -> Result<Transition, GatewayError> {
        self.transition(id, move |order| {
            order.state = OrderState::Paid;
            order.trade_id = trade_id;
            order.pay_time = Some(pay_time);
        })
        .await
    }

    async fn mark_expired(&self, id: &str, message: &str) -> Result<Transition, GatewayError> {
        let message = message.to_string();
        self.transition(id, move |order| {
            order.state = OrderState::Expired;
            order.message = Some(message);
        })
        .await
    }

    async fn mark_failed(&self, id: &str, message: &str) -> Result<Transition, GatewayError> {
        let message = message.to_string();
        self.transition(id, move |order| {
            order.state = OrderState::Failed;
            order.message = Some(message);
        })
        .await
    }

    async fn list_pending_crypto(&self) -> Result<Vec<Order>, GatewayError> {
        let mut pending: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|order| order.state == OrderState::Pending && order.channel_type.is_crypto())
            .cloned()
            .collect();
        pending.sort_by_key(|order| order.create_time);
        Ok(pending)
    }

    async fn find_by_trade_id(&self, trade_id: &str) -> Result<Option<Order>, GatewayError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|order| order.trade_id.as_deref() == Some(trade_id))
            .cloned())
    }
}

const ORDER_COLUMNS: &str = "id, channel_id, channel_type, business_id1, business_id2, business_id3, \
     subject, currency, amount_yuan, amount_fen, state, trade_id, message, receiving_address, \
     expected_token_amount, create_time, pay_time, cancel_time, update_time";

/// 订单表结构
///
/// `amount_yuan` 不固定小数位，按渠道精度写入什么读回什么 (整数渠道为 `12`，保留小数渠道为 `12.00`)
const ORDERS_SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        id                    VARCHAR(32) PRIMARY KEY,
        channel_id            VARCHAR(64) NOT NULL,
        channel_type          VARCHAR(16) NOT NULL,
        business_id1          VARCHAR(128) NOT NULL DEFAULT '',
        business_id2          VARCHAR(128) NOT NULL DEFAULT '',
        business_id3          VARCHAR(128) NOT NULL DEFAULT '',
        subject               TEXT NOT NULL,
        currency              VARCHAR(8) NOT NULL,
        amount_yuan           NUMERIC NOT NULL,
        amount_fen            BIGINT NOT NULL,
        state                 VARCHAR(16) NOT NULL,
        trade_id              TEXT,
        message               TEXT,
        receiving_address     TEXT,
        expected_token_amount TEXT,
        create_time           TIMESTAMPTZ NOT NULL,
        pay_time              TIMESTAMPTZ,
        cancel_time           TIMESTAMPTZ NOT NULL,
        update_time           TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS orders_pending_crypto ON orders (state, channel_type)",
    "CREATE UNIQUE INDEX IF NOT EXISTS orders_crypto_trade_id ON orders (trade_id) \
     WHERE trade_id IS NOT NULL AND channel_type IN ('erc20', 'trc20')",
];

/// PostgreSQL订单存储
///
/// 状态迁移使用 `UPDATE ... WHERE state = 'pending'`，以受影响行数判断是否由本次调用完成
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 建表 (已存在时不做修改)
    pub async fn ensure_schema(&self) -> Result<(), GatewayError> {
        for statement in ORDERS_SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create orders schema")?;
        }
        Ok(())
    }

    fn order_from_row(row: &PgRow) -> Result<Order, GatewayError> {
        let channel_type: String = row.try_get("channel_type").context("Failed to read channel_type")?;
        let state: String = row.try_get("state").context("Failed to read state")?;

        Ok(Order {
            id: row.try_get("id").context("Failed to read id")?,
            channel_id: row.try_get("channel_id").context("Failed to read channel_id")?,
            channel_type: channel_type.parse()?,
            business_id1: row.try_get("business_id1").context("Failed to read business_id1")?,
            business_id2: row.try_get("business_id2").context("Failed to read business_id2")?,
            business_id3: row.try_get("business_id3").context("Failed to read business_id3")?,
            subject: row.try_get("subject").context("Failed to read subject")?,
            currency: row.try_get("currency").context("Failed to read currency")?,
            amount_yuan: row.try_get("amount_yuan").context("Failed to read amount_yuan")?,
            amount_fen: row.try_get("amount_fen").context("Failed to read amount_fen")?,
            state: state.parse()?,
            trade_id: row.try_get("trade_id").context("Failed to read trade_id")?,
            message: row.try_get("message").context("Failed to read message")?,
            receiving_address: row.try_get("receiving_address").context("Failed to read receiving_address")?,
            expected_token_amount: row
                .try_get("expected_token_amount")
                .context("Failed to read expected_token_amount")?,
            create_time: row.try_get("create_time").context("Failed to read create_time")?,
            pay_time: row.try_get("pay_time").context("Failed to read pay_time")?,
            cancel_time: row.try_get("cancel_time").context("Failed to read cancel_time")?,
            update_time: row.try_get("update_time").context("Failed to read update_time")?,
        })
    }

    /// 条件更新：只有待支付订单会被修改
    async fn transition(
        &self,
        id: &str,
        state: OrderState,
        trade_id: Option<String>,
        pay_time: Option<DateTime<Utc>>,
        message: Option<&str>,
    ) -> Result<Transition, GatewayError> {
        let sql = format!(
            r#"
            UPDATE orders
            SET state = $2,
                trade_id = COALESCE($3, trade_id),
                pay_time = COALESCE($4, pay_time),
                message = COALESCE($5, message),
                update_time = NOW()
            WHERE id = $1 AND state = 'pending'
            RETURNING {}
            "#,
            ORDER_COLUMNS
        );

        let updated = sqlx::query(&sql)
            .bind(id)
            .bind(state.as_str())
            .bind(trade_id)
            .bind(pay_time)
            .bind(message)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to update order state")?;

        match updated {
            Some(row) => Ok(Transition::Applied(Self::order_from_row(&row)?)),
            None => self
                .get(id)
                .await?
                .map(Transition::AlreadyTerminal)
                .ok_or_else(|| GatewayError::OrderNotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: &Order) -> Result<bool, GatewayError> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO orders ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (id) DO NOTHING
            "#,
            ORDER_COLUMNS
        ))
        .bind(&order.id)
        .bind(&order.channel_id)
        .bind(order.channel_type.as_str())
        .bind(&order.business_id1)
        .bind(&order.business_id2)
        .bind(&order.business_id3)
        .bind(&order.subject)
        .bind(&order.currency)
        .bind(order.amount_yuan)
        .bind(order.amount_fen)
        .bind(order.state.as_str())
        .bind(&order.trade_id)
        .bind(&order.message)
        .bind(&order.receiving_address)
        .bind(&order.expected_token_amount)
        .bind(order.create_time)
        .bind(order.pay_time)
        .bind(order.cancel_time)
        .bind(order.update_time)
        .execute(&self.pool)
        .await
        .context("Failed to create order")?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: &str) -> Result<Option<Order>, GatewayError> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch order")?;

        row.as_ref().map(Self::order_from_row).transpose()
    }

    async fn get_by_business(&self, id: &str, business_ids: [&str; 3]) -> Result<Option<Order>, GatewayError> {
        Ok(self
            .get(id)
            .await?
            .filter(|order| order.matches_business_ids(business_ids)))
    }

    async fn mark_paid(
        &self,
        id: &str,
        trade_id: Option<String>,
        pay_time: DateTime<Utc>,
    ) -> Result<Transition, GatewayError> {
        self.transition(id, OrderState::Paid, trade_id, Some(pay_time), None)
            .await
    }

    async fn mark_expired(&self, id: &str, message: &str) -> Result<Transition, GatewayError> {
        self.transition(id, OrderState::Expired, None, None, Some(message))
            .await
    }

    async fn mark_failed(&self, id: &str, message: &str) -> Result<Transition, GatewayError> {
        self.transition(id, OrderState::Failed, None, None, Some(message))
            .await
    }

    async fn list_pending_crypto(&self) -> Result<Vec<Order>, GatewayError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE state = 'pending' AND channel_type IN ('erc20', 'trc20') ORDER BY create_time",
            ORDER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pending orders")?;

        rows.iter().map(Self::order_from_row).collect()
    }

    async fn find_by_trade_id(&self, trade_id: &str) -> Result<Option<Order>, GatewayError> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE trade_id = $1 LIMIT 1", ORDER_COLUMNS))
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query order by trade id")?;

        row.as_ref().map(Self::order_from_row).transpose()
    }
}
