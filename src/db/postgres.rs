use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

use crate::db::{OrderBy, OrderFilter, OrderStore};
use crate::models::{Order, PosSide};
use crate::Result;

const SELECT_ORDERS: &str = r#"
    SELECT id, ref_id, bot_id, exchange, symbol, side, pos_side, order_type, status,
           qty, open_price, stop_price, zone_price, sl_price, tp_price, close_price,
           commission, pl, open_time, update_time, close_time, open_order_id, close_order_id
    FROM orders
    WHERE 1 = 1
"#;

/// Postgres-backed order store
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres and run pending migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    /// * `max_connections` - Pool size
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres order store");

        Ok(Self { pool })
    }

    /// Delete every order of a bot (testing only)
    #[cfg(test)]
    pub async fn clear_bot(&self, bot_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM orders WHERE bot_id = $1")
            .bind(bot_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &OrderFilter) {
    if let Some(scope) = &filter.scope {
        qb.push(" AND bot_id = ").push_bind(scope.bot_id);
        qb.push(" AND exchange = ").push_bind(scope.exchange.clone());
        qb.push(" AND symbol = ").push_bind(scope.symbol.clone());
    }
    if let Some(side) = filter.side {
        qb.push(" AND side = ").push_bind(side.as_str());
    }
    if let Some(direction) = filter.direction {
        // Spot rows carry no pos_side: entries take the direction of their side,
        // protective orders the opposite one
        let (entry_side, protective_side) = match direction {
            PosSide::Long => ("BUY", "SELL"),
            PosSide::Short => ("SELL", "BUY"),
        };
        qb.push(" AND (pos_side = ")
            .push_bind(direction.as_str())
            .push(" OR (pos_side IS NULL AND ((order_type IN ('LIMIT', 'MARKET') AND side = ")
            .push_bind(entry_side)
            .push(") OR (order_type NOT IN ('LIMIT', 'MARKET') AND side = ")
            .push_bind(protective_side)
            .push("))))");
    }
    if !filter.types.is_empty() {
        qb.push(" AND order_type IN (");
        let mut types = qb.separated(", ");
        for order_type in &filter.types {
            types.push_bind(order_type.as_str());
        }
        types.push_unseparated(")");
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(status) = filter.not_status {
        qb.push(" AND status <> ").push_bind(status.as_str());
    }
    if filter.active_only {
        qb.push(" AND close_time = 0");
    }
    if let Some(id) = &filter.open_order_id {
        qb.push(" AND open_order_id = ").push_bind(id.clone());
    }
    if let Some(zone) = filter.zone_price {
        qb.push(" AND ABS(zone_price - ")
            .push_bind(zone)
            .push(") <= ")
            .push_bind(super::PRICE_EPSILON);
    }
    if let Some((lower, upper)) = filter.open_price_between {
        qb.push(" AND open_price BETWEEN ")
            .push_bind(lower - super::PRICE_EPSILON)
            .push(" AND ")
            .push_bind(upper + super::PRICE_EPSILON);
    }
    if let Some(order_by) = filter.order_by {
        qb.push(match order_by {
            OrderBy::OpenTimeDesc => " ORDER BY open_time DESC",
        });
    }
    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(limit as i64);
    }
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    let side: String = row.try_get("side")?;
    let pos_side: Option<String> = row.try_get("pos_side")?;
    let order_type: String = row.try_get("order_type")?;
    let status: String = row.try_get("status")?;

    Ok(Order {
        id: row.try_get("id")?,
        ref_id: row.try_get("ref_id")?,
        bot_id: row.try_get("bot_id")?,
        exchange: row.try_get("exchange")?,
        symbol: row.try_get("symbol")?,
        side: side.parse()?,
        pos_side: pos_side.map(|s| s.parse()).transpose()?,
        order_type: order_type.parse()?,
        status: status.parse()?,
        qty: row.try_get("qty")?,
        open_price: row.try_get("open_price")?,
        stop_price: row.try_get("stop_price")?,
        zone_price: row.try_get("zone_price")?,
        sl_price: row.try_get("sl_price")?,
        tp_price: row.try_get("tp_price")?,
        close_price: row.try_get("close_price")?,
        commission: row.try_get("commission")?,
        pl: row.try_get("pl")?,
        open_time: row.try_get("open_time")?,
        update_time: row.try_get("update_time")?,
        close_time: row.try_get("close_time")?,
        open_order_id: row.try_get("open_order_id")?,
        close_order_id: row.try_get("close_order_id")?,
    })
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn create_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, ref_id, bot_id, exchange, symbol, side, pos_side, order_type, status,
                qty, open_price, stop_price, zone_price, sl_price, tp_price, close_price,
                commission, pl, open_time, update_time, close_time, open_order_id, close_order_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(&order.id)
        .bind(&order.ref_id)
        .bind(order.bot_id)
        .bind(&order.exchange)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.pos_side.map(|p| p.as_str()))
        .bind(order.order_type.as_str())
        .bind(order.status.as_str())
        .bind(order.qty)
        .bind(order.open_price)
        .bind(order.stop_price)
        .bind(order.zone_price)
        .bind(order.sl_price)
        .bind(order.tp_price)
        .bind(order.close_price)
        .bind(order.commission)
        .bind(order.pl)
        .bind(order.open_time)
        .bind(order.update_time)
        .bind(order.close_time)
        .bind(&order.open_order_id)
        .bind(&order.close_order_id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(order_id = %order.id, "Inserted order");

        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE orders SET
                ref_id = $2, status = $3, qty = $4, open_price = $5, stop_price = $6,
                sl_price = $7, tp_price = $8, close_price = $9, commission = $10, pl = $11,
                update_time = $12, close_time = $13, close_order_id = $14, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&order.id)
        .bind(&order.ref_id)
        .bind(order.status.as_str())
        .bind(order.qty)
        .bind(order.open_price)
        .bind(order.stop_price)
        .bind(order.sl_price)
        .bind(order.tp_price)
        .bind(order.close_price)
        .bind(order.commission)
        .bind(order.pl)
        .bind(order.update_time)
        .bind(order.close_time)
        .bind(&order.close_order_id)
        .execute(&self.pool)
        .await?;

        tracing::debug!(order_id = %order.id, status = %order.status, "Updated order");

        Ok(())
    }

    async fn get_order_by_id(&self, id: &str) -> Result<Option<Order>> {
        let mut qb = QueryBuilder::new(SELECT_ORDERS);
        qb.push(" AND id = ").push_bind(id.to_string());

        let row = qb.build().fetch_optional(&self.pool).await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut qb = QueryBuilder::new(SELECT_ORDERS);
        push_filter(&mut qb, filter);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }
}
