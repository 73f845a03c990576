//! Main application orchestration.
//!
//! Owns the shared collaborators and one supervised subscription per
//! (cache, symbol):
//! - Push source (WebSocket) and REST client
//! - One `CompositeRateLimiter` shared by every cache
//! - Order book, trade and candle caches

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use marketsync_feed::{
    CandleCache, CandleUpdate, FeedError, OrderBookCache, OrderBookUpdate, SyncCache, SyncModel,
    TradeCache, TradeWindowUpdate, UpdateCallback,
};
use marketsync_rest::{CompositeRateLimiter, RestClient, RestSource};
use marketsync_ws::{PushSource, RetryConfig, RetryController, RetryStatus, WsPushSource};
use std::sync::Arc;
use tracing::{debug, error, info};

/// One supervised cache subscription.
struct Supervisor {
    label: String,
    controller: RetryController,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    limiter: Arc<CompositeRateLimiter>,
    order_books: OrderBookCache,
    trades: TradeCache,
    candles: CandleCache,
    supervisors: Vec<Supervisor>,
}

impl Application {
    /// Create an application talking to the configured endpoints.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let rest = RestClient::new(&config.rest)?;
        let push = WsPushSource::new(config.ws.clone());
        info!(
            rest_url = %rest.base_url(),
            ws_url = %push.config().base_url,
            "Collaborators created"
        );
        Self::with_sources(config, Arc::new(push), Arc::new(rest))
    }

    /// Create an application over arbitrary collaborators.
    pub fn with_sources(
        config: AppConfig,
        push: Arc<dyn PushSource>,
        rest: Arc<dyn RestSource>,
    ) -> AppResult<Self> {
        config.validate()?;
        let limiter = Arc::new(CompositeRateLimiter::with_rules(config.rate_limit_rules()?));

        let order_books = OrderBookCache::new(
            Arc::clone(&push),
            Arc::clone(&rest),
            Arc::clone(&limiter),
            config.order_book.clone(),
        );
        let trades = TradeCache::new(
            Arc::clone(&push),
            Arc::clone(&rest),
            Arc::clone(&limiter),
            config.trades.clone(),
        );
        let candles = CandleCache::new(push, rest, Arc::clone(&limiter), config.candles.clone());

        Ok(Self {
            config,
            limiter,
            order_books,
            trades,
            candles,
            supervisors: Vec::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<CompositeRateLimiter> {
        &self.limiter
    }

    pub fn order_books(&self) -> &OrderBookCache {
        &self.order_books
    }

    pub fn trades(&self) -> &TradeCache {
        &self.trades
    }

    pub fn candles(&self) -> &CandleCache {
        &self.candles
    }

    /// Start every subscription. Fails if already started.
    pub fn start(&mut self) -> AppResult<()> {
        if !self.supervisors.is_empty() {
            return Err(AppError::Config("application already started".to_string()));
        }

        let retry = &self.config.retry;
        let mut supervisors = Vec::with_capacity(self.config.symbols.len() * 3);
        for symbol in &self.config.symbols {
            supervisors.push(supervise(
                &self.order_books,
                symbol,
                Some(order_book_logger()),
                retry,
            )?);
            supervisors.push(supervise(&self.trades, symbol, Some(trade_logger()), retry)?);
            supervisors.push(supervise(&self.candles, symbol, Some(candle_logger()), retry)?);
        }
        self.supervisors = supervisors;

        info!(
            symbols = ?self.config.symbols,
            subscriptions = self.supervisors.len(),
            rate_limits = ?self.limiter.rules(),
            "Subscriptions started"
        );
        Ok(())
    }

    /// Status of every subscription, labelled `"{cache}:{symbol}"`.
    pub fn subscription_statuses(&self) -> Vec<(String, RetryStatus)> {
        self.supervisors
            .iter()
            .map(|s| (s.label.clone(), s.controller.status()))
            .collect()
    }

    /// Cancel every subscription and wait for each to finish.
    pub async fn shutdown(&mut self) {
        for supervisor in &self.supervisors {
            supervisor.controller.shutdown().await;
            debug!(subscription = %supervisor.label, "Subscription stopped");
        }
        info!(subscriptions = self.supervisors.len(), "Shutdown complete");
    }

    /// Start, then run until ctrl-c.
    pub async fn run(mut self) -> AppResult<()> {
        self.start()?;
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        self.shutdown().await;
        Ok(())
    }
}

fn supervise<M: SyncModel>(
    cache: &SyncCache<M>,
    symbol: &str,
    callback: Option<UpdateCallback<M::Update>>,
    retry: &RetryConfig,
) -> AppResult<Supervisor> {
    let label = format!("{}:{}", M::KIND, symbol);
    let controller = RetryController::new(retry.clone());

    let cache = cache.clone();
    let symbol = symbol.to_string();
    let failed = label.clone();
    controller.begin(
        move |cancel| {
            let cache = cache.clone();
            let symbol = symbol.clone();
            let callback = callback.clone();
            async move { cache.subscribe(&symbol, callback, cancel).await }
        },
        move |e: &FeedError| {
            error!(subscription = %failed, error = %e, "Subscription failed, restarting");
        },
    )?;

    Ok(Supervisor { label, controller })
}

fn order_book_logger() -> UpdateCallback<OrderBookUpdate> {
    Arc::new(|update: &OrderBookUpdate| {
        debug!(
            symbol = %update.snapshot.symbol,
            sequence_id = update.last_sequence_id,
            best_bid = ?update.best_bid.map(|l| l.price),
            best_ask = ?update.best_ask.map(|l| l.price),
            "Order book updated"
        );
    })
}

fn trade_logger() -> UpdateCallback<TradeWindowUpdate> {
    Arc::new(|update: &TradeWindowUpdate| {
        debug!(
            trades = update.trades.len(),
            new_trade_ids = ?update.new_trade_ids,
            "Trades updated"
        );
    })
}

fn candle_logger() -> UpdateCallback<CandleUpdate> {
    Arc::new(|update: &CandleUpdate| {
        if let Some(latest) = update.candles.last() {
            debug!(
                open_time = latest.open_time_ms,
                close = %latest.close,
                closed = latest.is_closed,
                "Candles updated"
            );
        }
    })
}
