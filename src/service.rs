//! Command logic, independent of the chat platform.
//!
//! Every operation reloads its documents from disk, validates, mutates and
//! saves them back, then returns a [`Reply`] for the adapter to render.
//! Mutating operations hold `write_lock` for the whole load → save span,
//! so concurrent commands in this process never overwrite each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{Config, StorageConfig};
use crate::cooldown::{epoch_secs, format_remaining, Cooldowns};
use crate::metrics::Metrics;
use crate::persistence::{JsonFile, StoreError};
use crate::stock::{Slot, SlotError, Stock, StockSchema, SummaryLine, Tier};

/// Discord caps embeds at 25 fields and autocomplete at 25 choices.
pub const MAX_CHOICES: usize = 25;

/// What a command ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Generated,
    Added,
    Summary,
    Empty,
    Info,
    Cooldown,
    OutOfStock,
    Invalid,
    Failed,
}

/// Stock summary rendered as an embed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryEmbed {
    pub title: String,
    /// (name, value) pairs, one per category
    pub fields: Vec<(String, String)>,
    pub footer: String,
}

/// Platform-neutral response to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub outcome: Outcome,
    pub content: String,
    pub embed: Option<SummaryEmbed>,
    /// Only the invoking user sees it
    pub ephemeral: bool,
}

impl Reply {
    fn private(outcome: Outcome, content: impl Into<String>) -> Self {
        Self {
            outcome,
            content: content.into(),
            embed: None,
            ephemeral: true,
        }
    }

    fn public(outcome: Outcome, content: impl Into<String>) -> Self {
        Self {
            ephemeral: false,
            ..Self::private(outcome, content)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::Generated | Outcome::Added | Outcome::Summary | Outcome::Empty | Outcome::Info
        )
    }
}

/// Sink for "someone generated an item" notices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn item_generated(
        &self,
        user_id: u64,
        slot: &Slot,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub struct StockService {
    config: Arc<Config>,
    stock_file: JsonFile,
    cooldown_file: JsonFile,
    metrics: Arc<Metrics>,
    notifier: Option<Arc<dyn Notifier>>,
    write_lock: Mutex<()>,
}

impl StockService {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        let stock_file = JsonFile::new(&config.storage.stock_path);
        let cooldown_file = JsonFile::new(&config.storage.cooldown_path);
        Self {
            config,
            stock_file,
            cooldown_file,
            metrics,
            notifier: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Hand one item from `category`/`tier` to `user_id`.
    pub async fn generate(
        &self,
        user_id: u64,
        category: Option<&str>,
        tier: Option<Tier>,
        now: DateTime<Utc>,
    ) -> Reply {
        let slot = Slot::new(category, tier);
        let reply = {
            let _guard = self.write_lock.lock().await;
            self.generate_locked(user_id, &slot, epoch_secs(now))
        };

        match reply.outcome {
            Outcome::Generated => {
                self.metrics.record_generated();
                self.notify(user_id, &slot).await;
            }
            Outcome::Failed => self.metrics.record_failure(),
            _ => self.metrics.record_rejected(),
        }
        reply
    }

    fn generate_locked(&self, user_id: u64, slot: &Slot, now: f64) -> Reply {
        let user = user_id.to_string();
        let window = self.config.cooldown();

        let mut cooldowns = match Cooldowns::try_load(&self.cooldown_file) {
            Ok(cooldowns) => cooldowns,
            Err(e) => {
                error!(user = %user, error = %e, "cooldown file unreadable, refusing to overwrite");
                return unreadable_reply();
            }
        };
        if let Some(left) = cooldowns.remaining(&user, now, window) {
            info!(user = %user, remaining_secs = left.as_secs(), "generate refused: cooldown");
            return Reply::private(
                Outcome::Cooldown,
                format!(
                    "⏰ ¡Tranquilo! Debes esperar **{}** antes de usar este comando de nuevo.",
                    format_remaining(left)
                ),
            );
        }

        let mut stock = match Stock::try_load(&self.stock_file, self.config.schema) {
            Ok(stock) => stock,
            Err(e) => {
                error!(user = %user, error = %e, "stock file unreadable, refusing to overwrite");
                return unreadable_reply();
            }
        };
        if let Err(e) = stock.require(slot) {
            return slot_error_reply(e);
        }

        let Some(item) = stock.take(slot) else {
            info!(user = %user, slot = %slot, "generate refused: out of stock");
            return out_of_stock_reply(slot, self.config.schema);
        };

        // Stock first: if this fails nothing on disk changed and the item
        // stays available.
        if let Err(e) = stock.save(&self.stock_file) {
            error!(user = %user, slot = %slot, error = %e, "failed to save stock, item not handed out");
            return Reply::private(
                Outcome::Failed,
                "⚠️ Ocurrió un error inesperado al intentar generar el ítem. Inténtalo de nuevo.",
            );
        }

        cooldowns.stamp(&user, now);
        if let Err(e) = cooldowns.save(&self.cooldown_file) {
            // The item is already gone from disk, so it is delivered anyway.
            error!(user = %user, error = %e, "failed to save cooldown, user not rate limited");
        }

        info!(user = %user, slot = %slot, remaining = stock.count(slot), "item generated");
        Reply::private(
            Outcome::Generated,
            format!(
                "✅ ¡Ítem Generado!\n\n||{}||\n\n*(Este ítem ha sido removido del stock. Próximo uso disponible en {}.)*",
                item,
                format_window(window)
            ),
        )
    }

    async fn notify(&self, user_id: u64, slot: &Slot) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.item_generated(user_id, slot).await {
                warn!(user = user_id, error = %e, "failed to send admin notification");
            }
        }
    }

    /// Append every non-blank line of `items` to `category`/`tier`.
    pub async fn add_stock(
        &self,
        category: Option<&str>,
        tier: Option<Tier>,
        items: &str,
        now: DateTime<Utc>,
    ) -> Reply {
        let slot = Slot::new(category, tier);
        let new_items: Vec<String> = items
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();

        let reply = {
            let _guard = self.write_lock.lock().await;
            self.add_stock_locked(&slot, new_items, now)
        };

        match reply.outcome {
            Outcome::Failed => self.metrics.record_failure(),
            Outcome::Added => {}
            _ => self.metrics.record_rejected(),
        }
        reply
    }

    fn add_stock_locked(&self, slot: &Slot, new_items: Vec<String>, now: DateTime<Utc>) -> Reply {
        let mut stock = match Stock::try_load(&self.stock_file, self.config.schema) {
            Ok(stock) => stock,
            Err(e) => {
                error!(slot = %slot, error = %e, "stock file unreadable, refusing to overwrite");
                return unreadable_reply();
            }
        };
        if let Err(e) = stock.require(slot) {
            return slot_error_reply(e);
        }
        if new_items.is_empty() {
            return Reply::private(
                Outcome::Invalid,
                "❌ No se encontró ningún ítem para añadir.",
            );
        }

        let added = new_items.len();
        for item in new_items {
            if let Err(e) = stock.add(slot, item, now) {
                return slot_error_reply(e);
            }
        }

        if let Err(e) = stock.save(&self.stock_file) {
            error!(slot = %slot, error = %e, "failed to save stock, items not added");
            return Reply::private(
                Outcome::Failed,
                "⚠️ Ocurrió un error inesperado al guardar el stock. Inténtalo de nuevo.",
            );
        }
        self.metrics.record_added(added as u64);

        let in_slot = stock.count(slot);
        info!(slot = %slot, added, in_slot, "stock added");
        let content = if self.config.schema.uses_categories() {
            format!(
                "➕ **¡Stock Actualizado!** Se añadieron **{}** nuevos ítems a **{}**. Stock en {}: {}",
                added, slot, slot, in_slot
            )
        } else {
            format!(
                "➕ **¡Stock Actualizado!** Se añadieron **{}** nuevos ítems al stock. Stock total: {}",
                added, in_slot
            )
        };
        Reply::private(Outcome::Added, content)
    }

    /// Per-category counts and the grand total. Read-only.
    pub fn check_stock(&self) -> Reply {
        let stock = Stock::load(&self.stock_file, self.config.schema);
        let total = stock.total();
        if total == 0 {
            return Reply::private(Outcome::Empty, "📭 No hay stock registrado en este momento.");
        }

        let embed = SummaryEmbed {
            title: "📊 Stock Disponible".to_string(),
            fields: summary_fields(&stock.summary()),
            footer: format!("Total: {} ítems listos para ser generados", total),
        };
        Reply {
            outcome: Outcome::Summary,
            content: String::new(),
            embed: Some(embed),
            ephemeral: true,
        }
    }

    /// Payment details for premium access, posted in the channel.
    pub fn upgrade_premium(&self) -> Reply {
        let premium = &self.config.premium;
        let mut content = String::from("💎 **Mejora a Premium**\n\n");
        if premium.addresses.is_empty() {
            content.push_str("Contacta a un administrador para conocer los métodos de pago.");
        } else {
            content.push_str("Envía tu pago a cualquiera de estas direcciones:\n");
            for addr in &premium.addresses {
                content.push_str(&format!("• **{}**: `{}`\n", addr.label, addr.address));
            }
        }
        if let Some(note) = &premium.note {
            content.push_str(&format!("\n{}", note));
        }
        Reply::public(Outcome::Info, content.trim_end().to_string())
    }

    /// Non-empty categories starting with `partial` (case-insensitive).
    pub fn autocomplete_categories(&self, partial: &str) -> Vec<String> {
        let partial = partial.trim().to_lowercase();
        Stock::load(&self.stock_file, self.config.schema)
            .available_categories()
            .into_iter()
            .filter(|c| c.starts_with(&partial))
            .take(MAX_CHOICES)
            .collect()
    }
}

/// Create the stock and cooldown documents empty if they are missing.
pub fn init_storage(storage: &StorageConfig) -> Result<(), StoreError> {
    JsonFile::new(&storage.stock_path).ensure_exists()?;
    JsonFile::new(&storage.cooldown_path).ensure_exists()?;
    Ok(())
}

fn slot_error_reply(e: SlotError) -> Reply {
    let content = match e {
        SlotError::MissingCategory => "❌ Debes indicar una categoría.",
        SlotError::MissingTier => "❌ Debes indicar el tipo de suscripción (premium o free).",
    };
    Reply::private(Outcome::Invalid, content)
}

fn unreadable_reply() -> Reply {
    Reply::private(
        Outcome::Failed,
        "⚠️ El archivo de datos no se pudo leer y no se ha modificado. Avisa a un administrador.",
    )
}

fn out_of_stock_reply(slot: &Slot, schema: StockSchema) -> Reply {
    let content = if schema.uses_categories() {
        format!(
            "❌ **¡Stock Agotado!** No hay ítems disponibles de **{}** en este momento.",
            slot
        )
    } else {
        "❌ **¡Stock Agotado!** No hay ítems disponibles en este momento.".to_string()
    };
    Reply::private(Outcome::OutOfStock, content)
}

/// Group summary rows into one embed field per category.
fn summary_fields(lines: &[SummaryLine]) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::new();
    for line in lines {
        let name = line
            .category
            .clone()
            .unwrap_or_else(|| "General".to_string());
        let value = match line.tier {
            Some(tier) => format!("{}: **{}**", capitalize(&tier.to_string()), line.count),
            None => format!("**{}** ítems", line.count),
        };
        match fields.last_mut() {
            Some((last, existing)) if *last == name => {
                existing.push('\n');
                existing.push_str(&value);
            }
            _ => fields.push((name, value)),
        }
    }

    if fields.len() > MAX_CHOICES {
        let hidden = fields.len() - (MAX_CHOICES - 1);
        fields.truncate(MAX_CHOICES - 1);
        fields.push((
            "…".to_string(),
            format!("y {} categorías más", hidden),
        ));
    }
    fields
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Human wording for the cooldown window.
fn format_window(window: Duration) -> String {
    let secs = window.as_secs();
    match secs {
        3600 => "1 hora".to_string(),
        s if s > 0 && s % 3600 == 0 => format!("{} horas", s / 3600),
        60 => "1 minuto".to_string(),
        s if s > 0 && s % 60 == 0 => format!("{} minutos", s / 60),
        s => format!("{} segundos", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaymentAddress;
    use std::path::Path;
    use tempfile::tempdir;

    fn service(dir: &Path, schema: StockSchema) -> StockService {
        let config = Config {
            guild_id: 1,
            schema,
            storage: StorageConfig {
                stock_path: dir.join("stock.json"),
                cooldown_path: dir.join("cooldown.json"),
            },
            ..Config::default()
        };
        StockService::new(Arc::new(config), Arc::new(Metrics::new()))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_format_window() {
        assert_eq!(format_window(Duration::from_secs(3600)), "1 hora");
        assert_eq!(format_window(Duration::from_secs(7200)), "2 horas");
        assert_eq!(format_window(Duration::from_secs(300)), "5 minutos");
        assert_eq!(format_window(Duration::from_secs(45)), "45 segundos");
    }

    #[test]
    fn test_summary_fields_groups_tiers() {
        let lines = vec![
            SummaryLine {
                category: Some("netflix".into()),
                tier: Some(Tier::Premium),
                count: 2,
            },
            SummaryLine {
                category: Some("netflix".into()),
                tier: Some(Tier::Free),
                count: 0,
            },
        ];
        let fields = summary_fields(&lines);
        assert_eq!(
            fields,
            vec![("netflix".to_string(), "Premium: **2**\nFree: **0**".to_string())]
        );
    }

    #[test]
    fn test_summary_fields_capped() {
        let lines: Vec<SummaryLine> = (0..30)
            .map(|i| SummaryLine {
                category: Some(format!("c{:02}", i)),
                tier: None,
                count: 1,
            })
            .collect();
        let fields = summary_fields(&lines);
        assert_eq!(fields.len(), MAX_CHOICES);
        assert_eq!(fields[MAX_CHOICES - 1].1, "y 6 categorías más");
    }

    #[tokio::test]
    async fn test_generate_notifies_admin() {
        let dir = tempdir().unwrap();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_item_generated()
            .withf(|user, slot| *user == 42 && slot.category.as_deref() == Some("netflix"))
            .times(1)
            .returning(|_, _| Ok(()));

        let svc = service(dir.path(), StockSchema::Category).with_notifier(Arc::new(notifier));
        svc.add_stock(Some("Netflix"), None, "acct1", at(1_000)).await;

        let reply = svc.generate(42, Some("netflix"), None, at(1_000)).await;
        assert_eq!(reply.outcome, Outcome::Generated);
    }

    #[tokio::test]
    async fn test_notifier_not_called_on_refusal() {
        let dir = tempdir().unwrap();
        let mut notifier = MockNotifier::new();
        notifier.expect_item_generated().times(0);

        let svc = service(dir.path(), StockSchema::Category).with_notifier(Arc::new(notifier));
        let reply = svc.generate(42, Some("netflix"), None, at(1_000)).await;
        assert_eq!(reply.outcome, Outcome::OutOfStock);
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_change_reply() {
        let dir = tempdir().unwrap();
        let mut notifier = MockNotifier::new();
        notifier
            .expect_item_generated()
            .returning(|_, _| Err("channel gone".into()));

        let svc = service(dir.path(), StockSchema::Flat).with_notifier(Arc::new(notifier));
        svc.add_stock(None, None, "a", at(1_000)).await;
        let reply = svc.generate(7, None, None, at(1_000)).await;
        assert_eq!(reply.outcome, Outcome::Generated);
        assert!(reply.content.contains("||a||"));
    }

    #[tokio::test]
    async fn test_generate_stock_save_failure_keeps_cooldown_clear() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path(), StockSchema::Flat);
        svc.add_stock(None, None, "a", at(1_000)).await;

        // Block the temp file so the stock save fails
        std::fs::create_dir(dir.path().join("stock.json.tmp")).unwrap();

        let reply = svc.generate(7, None, None, at(1_000)).await;
        assert_eq!(reply.outcome, Outcome::Failed);
        assert!(!reply.content.contains("||a||"));

        std::fs::remove_dir(dir.path().join("stock.json.tmp")).unwrap();
        let cooldowns = Cooldowns::try_load(&JsonFile::new(dir.path().join("cooldown.json"))).unwrap();
        assert!(cooldowns.is_empty());
        assert_eq!(svc.check_stock().outcome, Outcome::Summary);
        assert_eq!(svc.metrics.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_generate_cooldown_save_failure_still_delivers() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path(), StockSchema::Flat);
        svc.add_stock(None, None, "a\nb", at(1_000)).await;

        // Block the temp file so only the cooldown save fails
        std::fs::create_dir(dir.path().join("cooldown.json.tmp")).unwrap();

        let reply = svc.generate(7, None, None, at(2_000)).await;
        assert_eq!(reply.outcome, Outcome::Generated);
        assert!(reply.content.contains("||a||"));

        let stock = Stock::try_load(&svc.stock_file, StockSchema::Flat).unwrap();
        assert_eq!(stock.total(), 1);
        match stock {
            Stock::Flat(items) => assert!(!items.values().any(|v| v == "a")),
            _ => unreachable!(),
        }
        assert!(!dir.path().join("cooldown.json").exists());
        assert_eq!(svc.metrics.snapshot().items_generated, 1);
    }

    #[tokio::test]
    async fn test_add_stock_refuses_document_in_other_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stock.json");
        let tiered = r#"{"netflix":{"premium":["p1","p2"],"free":["f1"]}}"#;
        std::fs::write(&path, tiered).unwrap();

        let svc = service(dir.path(), StockSchema::Flat);
        let reply = svc.add_stock(None, None, "x", at(1_000)).await;

        assert_eq!(reply.outcome, Outcome::Failed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), tiered);
        assert_eq!(svc.metrics.snapshot().items_added, 0);
        assert_eq!(svc.metrics.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_generate_refuses_unreadable_cooldown_file() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path(), StockSchema::Flat);
        svc.add_stock(None, None, "a", at(1_000)).await;
        let cooldown_path = dir.path().join("cooldown.json");
        std::fs::write(&cooldown_path, "{broken").unwrap();

        let reply = svc.generate(7, None, None, at(2_000)).await;
        assert_eq!(reply.outcome, Outcome::Failed);
        assert!(!reply.content.contains("||a||"));
        assert_eq!(std::fs::read_to_string(&cooldown_path).unwrap(), "{broken");
        assert_eq!(svc.check_stock().outcome, Outcome::Summary);
    }

    #[tokio::test]
    async fn test_add_stock_blank_input() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path(), StockSchema::Flat);
        let reply = svc.add_stock(None, None, "  \n\n   ", at(1_000)).await;
        assert_eq!(reply.outcome, Outcome::Invalid);
        assert!(!dir.path().join("stock.json").exists());
    }

    #[tokio::test]
    async fn test_add_stock_requires_category() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path(), StockSchema::Tiered);
        let reply = svc.add_stock(Some("  "), Some(Tier::Free), "x", at(1_000)).await;
        assert_eq!(reply.outcome, Outcome::Invalid);
        assert!(reply.content.contains("categoría"));

        let reply = svc.add_stock(Some("netflix"), None, "x", at(1_000)).await;
        assert_eq!(reply.outcome, Outcome::Invalid);
        assert!(reply.content.contains("premium o free"));
    }

    #[tokio::test]
    async fn test_autocomplete_categories() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path(), StockSchema::Category);
        svc.add_stock(Some("netflix"), None, "a", at(1_000)).await;
        svc.add_stock(Some("nba"), None, "b", at(1_000)).await;
        svc.add_stock(Some("spotify"), None, "c", at(1_000)).await;
        svc.generate(1, Some("nba"), None, at(1_000)).await;

        assert_eq!(svc.autocomplete_categories("N"), vec!["netflix"]);
        assert_eq!(svc.autocomplete_categories(""), vec!["netflix", "spotify"]);
        assert!(svc.autocomplete_categories("x").is_empty());
    }

    #[test]
    fn test_upgrade_premium_is_public() {
        let dir = tempdir().unwrap();
        let mut config = Config {
            schema: StockSchema::Tiered,
            ..Config::default()
        };
        config.storage.stock_path = dir.path().join("stock.json");
        config.premium.addresses.push(PaymentAddress {
            label: "BTC".into(),
            address: "bc1qexample".into(),
        });
        config.premium.note = Some("Envía el comprobante a un admin.".into());
        let svc = StockService::new(Arc::new(config), Arc::new(Metrics::new()));

        let reply = svc.upgrade_premium();
        assert_eq!(reply.outcome, Outcome::Info);
        assert!(!reply.ephemeral);
        assert!(reply.content.contains("• **BTC**: `bc1qexample`"));
        assert!(reply.content.ends_with("Envía el comprobante a un admin."));
    }

    #[test]
    fn test_upgrade_premium_without_addresses() {
        let dir = tempdir().unwrap();
        let svc = service(dir.path(), StockSchema::Tiered);
        let reply = svc.upgrade_premium();
        assert!(reply.content.contains("Contacta a un administrador"));
    }
}
