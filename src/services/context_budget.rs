//! Context Budget Manager: virtual-memory manager for the context window.
//!
//! Tracks what occupies context, scores items by epistemic priority, evicts
//! low-value items under pressure, and handles page faults by requesting
//! injections. Subscribes to the bus and reacts to session lifecycle events.
//!
//! All mutation goes through one lock; eviction within a single pass is
//! deterministic given the priority snapshot taken at entry.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bus::EpistemicBus;
use crate::domain::errors::KernelResult;
use crate::domain::models::{
    BudgetReport, BudgetThresholds, ContentType, ContextItem, EpistemicEvent, EventType,
    EvictionResult, InjectionChannel, InjectionPriority, InjectionRequest, ItemSummary, MemoryZone,
};
use crate::domain::ports::{EpistemicObserver, InjectionHandler};
use crate::storage::{BudgetRepository, ContextBudgetState};

struct CbmState {
    inventory: HashMap<String, ContextItem>,
    handlers: HashMap<InjectionChannel, Arc<dyn InjectionHandler>>,
    page_faults: u64,
    evictions: u64,
}

pub struct ContextBudgetManager {
    session_id: Uuid,
    thresholds: BudgetThresholds,
    bus: EpistemicBus,
    state: Mutex<CbmState>,
    agent_id: String,
}

impl ContextBudgetManager {
    pub fn new(session_id: Uuid, thresholds: BudgetThresholds, bus: EpistemicBus) -> Self {
        Self {
            session_id,
            thresholds,
            bus,
            state: Mutex::new(CbmState {
                inventory: HashMap::new(),
                handlers: HashMap::new(),
                page_faults: 0,
                evictions: 0,
            }),
            agent_id: "context_budget_manager".to_string(),
        }
    }

    // --- Item management ---

    /// Register an item as present in the context window, like mapping a
    /// page into the address space.
    ///
    /// If the zone is full, same-zone evictable items are evicted to make
    /// room; when even a full sweep cannot free enough, the registration is
    /// rejected and no state changes.
    #[instrument(skip(self, item), fields(session_id = %self.session_id, item_id = %item.id))]
    pub async fn register_item(&self, mut item: ContextItem) -> KernelResult<bool> {
        if item.zone == MemoryZone::Anchor {
            item.evictable = false;
        }

        // Eviction and insertion happen under one critical section so a
        // concurrent registration cannot steal the freed space.
        let evicted = {
            let mut state = self.state.lock().await;
            let zone_budget = self.thresholds.zone_budget(item.zone);
            let zone_used = zone_usage(&state.inventory, item.zone);

            let result = if zone_used + item.estimated_tokens > zone_budget {
                let needed = zone_used + item.estimated_tokens - zone_budget;

                // Plan the eviction against a snapshot first: the zone may
                // not hold enough evictable tokens, and a rejection must
                // leave the inventory untouched.
                let plan = eviction_plan(
                    &state.inventory,
                    Some(item.zone),
                    needed,
                    self.thresholds.decay_rate,
                );
                if plan.tokens_freed < needed {
                    warn!(
                        zone = item.zone.as_str(),
                        needed,
                        freeable = plan.tokens_freed,
                        "cannot register item: zone full"
                    );
                    return Ok(false);
                }

                for id in &plan.ids {
                    state.inventory.remove(id);
                }
                state.evictions += plan.ids.len() as u64;
                Some(EvictionResult {
                    evicted: plan.summaries,
                    tokens_freed: plan.tokens_freed,
                    reason: "make_room".to_string(),
                    triggered_by: format!("register_{}", item.id),
                })
            } else {
                None
            };

            debug!(
                label = %item.label,
                tokens = item.estimated_tokens,
                zone = item.zone.as_str(),
                "registered context item"
            );
            state.inventory.insert(item.id.clone(), item);
            result
        };

        if let Some(result) = evicted {
            self.publish_eviction(&result, result.tokens_freed).await;
        }
        Ok(true)
    }

    /// Remove an item from the inventory (no longer in context).
    pub async fn unregister_item(&self, item_id: &str) -> Option<ContextItem> {
        let mut state = self.state.lock().await;
        let item = state.inventory.remove(item_id);
        if let Some(ref item) = item {
            debug!(label = %item.label, "unregistered context item");
        }
        item
    }

    /// Mark an item as recently referenced (LRU bookkeeping).
    pub async fn touch_item(&self, item_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(item) = state.inventory.get_mut(item_id) {
            item.touch();
        }
    }

    /// Items matching the criteria, ordered by priority descending.
    pub async fn find_items(
        &self,
        zone: Option<MemoryZone>,
        content_type: Option<ContentType>,
        min_priority: Option<f64>,
    ) -> Vec<ContextItem> {
        let state = self.state.lock().await;
        let decay = self.thresholds.decay_rate;
        let mut items: Vec<ContextItem> = state
            .inventory
            .values()
            .filter(|item| zone.is_none_or(|z| item.zone == z))
            .filter(|item| content_type.is_none_or(|ct| item.content_type == ct))
            .filter(|item| min_priority.is_none_or(|min| item.priority(decay) >= min))
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            b.priority(decay)
                .partial_cmp(&a.priority(decay))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        items
    }

    pub async fn get_item(&self, item_id: &str) -> Option<ContextItem> {
        self.state.lock().await.inventory.get(item_id).cloned()
    }

    // --- Eviction ---

    /// Evict lowest-priority evictable items across all zones until
    /// `tokens_needed` is freed. Publishes `context_evicted`.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn evict_lowest_priority(
        &self,
        tokens_needed: u64,
        reason: &str,
    ) -> EvictionResult {
        let result = {
            let mut state = self.state.lock().await;
            let plan = eviction_plan(
                &state.inventory,
                None,
                tokens_needed,
                self.thresholds.decay_rate,
            );
            for id in &plan.ids {
                state.inventory.remove(id);
            }
            state.evictions += plan.ids.len() as u64;
            EvictionResult {
                evicted: plan.summaries,
                tokens_freed: plan.tokens_freed,
                reason: reason.to_string(),
                triggered_by: "evict_lowest_priority".to_string(),
            }
        };

        if !result.evicted.is_empty() {
            info!(
                count = result.evicted.len(),
                tokens_freed = result.tokens_freed,
                reason,
                "evicted context items"
            );
        }
        self.publish_eviction(&result, tokens_needed).await;
        result
    }

    async fn publish_eviction(&self, result: &EvictionResult, tokens_needed: u64) {
        if result.evicted.is_empty() && result.tokens_freed >= tokens_needed {
            return;
        }
        let reason = if result.tokens_freed < tokens_needed {
            "insufficient_evictable".to_string()
        } else {
            result.reason.clone()
        };
        self.bus
            .publish(EpistemicEvent::new(
                EventType::ContextEvicted,
                &self.agent_id,
                self.session_id,
                json!({
                    "items_evicted": result.evicted.len(),
                    "tokens_freed": result.tokens_freed,
                    "tokens_needed": tokens_needed,
                    "reason": reason,
                    "evicted_labels": result
                        .evicted
                        .iter()
                        .map(|i| i.label.chars().take(50).collect::<String>())
                        .collect::<Vec<_>>(),
                }),
            ))
            .await;
    }

    // --- Injection ---

    /// Request injection of content into the context window.
    ///
    /// Rejects non-critical requests that would exceed total capacity;
    /// critical requests evict first. Routes to the registered handler for
    /// the preferred channel, then registers the item and publishes
    /// `context_injected`.
    #[instrument(skip(self, request), fields(session_id = %self.session_id, content_id = %request.content_id))]
    pub async fn request_injection(&self, request: InjectionRequest) -> KernelResult<bool> {
        let total_used = {
            let state = self.state.lock().await;
            total_usage(&state.inventory)
        };

        if total_used + request.estimated_tokens > self.thresholds.total_capacity {
            if request.priority != InjectionPriority::Critical {
                info!(
                    content_id = %request.content_id,
                    tokens = request.estimated_tokens,
                    "injection rejected: would exceed budget"
                );
                return Ok(false);
            }
            self.evict_lowest_priority(
                request.estimated_tokens,
                &format!("critical_injection_{}", request.content_id),
            )
            .await;
        }

        let handler = {
            let state = self.state.lock().await;
            state.handlers.get(&request.preferred_channel).cloned()
        };
        if let Some(handler) = handler {
            if let Err(e) = handler.inject(&request).await {
                warn!(error = %e, "injection handler failed");
                return Ok(false);
            }
        }

        let zone = if request.priority == InjectionPriority::Critical {
            MemoryZone::Working
        } else {
            MemoryZone::Cache
        };
        let mut item = ContextItem::new(
            request.content_id.clone(),
            zone,
            request.content_type,
            request.content_id.clone(),
            request.estimated_tokens,
        )
        .with_source(request.content_id.clone())
        .with_channel(request.preferred_channel)
        .with_value(request.epistemic_value);
        item.metadata = request.metadata.clone();
        self.register_item(item).await?;

        self.bus
            .publish(EpistemicEvent::new(
                EventType::ContextInjected,
                &self.agent_id,
                self.session_id,
                json!({
                    "content_id": request.content_id,
                    "reason": request.reason,
                    "tokens": request.estimated_tokens,
                    "channel": request.preferred_channel.as_str(),
                }),
            ))
            .await;
        Ok(true)
    }

    /// Register (or replace) the handler for an injection channel.
    pub async fn register_injection_handler(
        &self,
        channel: InjectionChannel,
        handler: Arc<dyn InjectionHandler>,
    ) {
        let mut state = self.state.lock().await;
        state.handlers.insert(channel, handler);
        info!(channel = channel.as_str(), "registered injection handler");
    }

    // --- Pressure & decay ---

    /// Recompute priorities and drop evictable items below the priority
    /// floor, then check for memory pressure.
    pub async fn decay_pass(&self) {
        let decayed = {
            let mut state = self.state.lock().await;
            let decay = self.thresholds.decay_rate;
            let floor = self.thresholds.min_priority_threshold;
            let stale: Vec<String> = state
                .inventory
                .values()
                .filter(|item| item.evictable && item.priority(decay) < floor)
                .map(|item| item.id.clone())
                .collect();
            for id in &stale {
                state.inventory.remove(id);
            }
            state.evictions += stale.len() as u64;
            stale.len()
        };

        if decayed > 0 {
            info!(count = decayed, "decay pass evicted stale items");
        }
        self.check_pressure().await;
    }

    async fn check_pressure(&self) {
        let report = self.budget_report().await;
        if report.utilization < self.thresholds.pressure_threshold {
            return;
        }

        warn!(
            utilization = report.utilization,
            used = report.total_used,
            capacity = report.total_capacity,
            "memory pressure"
        );
        self.bus
            .publish(EpistemicEvent::new(
                EventType::MemoryPressure,
                &self.agent_id,
                self.session_id,
                json!({
                    "utilization": report.utilization,
                    "total_used": report.total_used,
                    "total_capacity": report.total_capacity,
                    "eviction_candidates": report.eviction_candidates,
                }),
            ))
            .await;

        if self.thresholds.eviction_aggressiveness > 0.5 {
            let target = (report.total_capacity as f64 * 0.7) as u64;
            if report.total_used > target {
                self.evict_lowest_priority(report.total_used - target, "auto_pressure_relief")
                    .await;
            }
        }
    }

    // --- Reporting ---

    /// Complete budget snapshot, like /proc/meminfo.
    pub async fn budget_report(&self) -> BudgetReport {
        let state = self.state.lock().await;
        let decay = self.thresholds.decay_rate;

        let total_used = total_usage(&state.inventory);
        let anchor_used = zone_usage(&state.inventory, MemoryZone::Anchor);
        let working_used = zone_usage(&state.inventory, MemoryZone::Working);
        let cache_used = zone_usage(&state.inventory, MemoryZone::Cache);

        let mut scored: Vec<(ItemSummary, f64)> = state
            .inventory
            .values()
            .map(|item| (summarize(item, decay), item.priority(decay)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let eviction_candidates = scored
            .iter()
            .filter(|(summary, score)| summary.evictable && *score < self.thresholds.min_priority_threshold)
            .count();
        let utilization = total_used as f64 / self.thresholds.total_capacity.max(1) as f64;

        let count_zone = |zone: MemoryZone| {
            state
                .inventory
                .values()
                .filter(|i| i.zone == zone)
                .count()
        };

        BudgetReport {
            timestamp: Utc::now(),
            session_id: self.session_id.to_string(),
            total_capacity: self.thresholds.total_capacity,
            total_used,
            total_available: self.thresholds.total_capacity.saturating_sub(total_used),
            utilization,
            anchor_used,
            anchor_limit: self.thresholds.anchor_reserve,
            working_used,
            working_target: self.thresholds.working_set_target,
            cache_used,
            cache_limit: self.thresholds.cache_limit,
            total_items: state.inventory.len(),
            anchor_items: count_zone(MemoryZone::Anchor),
            working_items: count_zone(MemoryZone::Working),
            cache_items: count_zone(MemoryZone::Cache),
            under_pressure: utilization >= self.thresholds.pressure_threshold,
            eviction_candidates,
            top_items: scored.iter().take(5).map(|(s, _)| s.clone()).collect(),
            bottom_items: scored.iter().rev().take(5).map(|(s, _)| s.clone()).collect(),
        }
    }

    /// Quick counters for dashboards and the statusline.
    pub async fn inventory_summary(&self) -> InventorySummary {
        let state = self.state.lock().await;
        let total = total_usage(&state.inventory);
        InventorySummary {
            tokens_used: total,
            tokens_available: self.thresholds.total_capacity.saturating_sub(total),
            item_count: state.inventory.len(),
            anchor_tokens: zone_usage(&state.inventory, MemoryZone::Anchor),
            working_tokens: zone_usage(&state.inventory, MemoryZone::Working),
            cache_tokens: zone_usage(&state.inventory, MemoryZone::Cache),
            page_faults: state.page_faults,
            evictions: state.evictions,
        }
    }

    /// Persist state for cross-session continuity.
    pub async fn persist_state(&self, repo: &BudgetRepository) -> KernelResult<()> {
        let state = self.state.lock().await;
        repo.save_context_state(&ContextBudgetState {
            session_id: self.session_id,
            inventory: state.inventory.values().cloned().collect(),
            thresholds: self.thresholds.clone(),
            page_faults: state.page_faults,
            evictions: state.evictions,
        })
        .await
    }

    // --- Event reactions ---

    async fn on_confidence_dropped(&self, event: &EpistemicEvent) {
        {
            let mut state = self.state.lock().await;
            state.page_faults += 1;
        }
        let vector = event.data["vector"].as_str().unwrap_or("know").to_string();
        let value = event.data["value"].as_f64().unwrap_or(0.0);
        info!(vector = %vector, value, "page fault: confidence dropped");

        self.bus
            .publish(EpistemicEvent::new(
                EventType::PageFault,
                &self.agent_id,
                self.session_id,
                json!({ "vector": vector, "value": value }),
            ))
            .await;

        let request = match vector.as_str() {
            "know" | "context" => InjectionRequest::new(
                "project_bootstrap",
                format!("{vector}_dropped_to_{value:.2}"),
                ContentType::Bootstrap,
                InjectionChannel::Mcp,
                5000,
            )
            .with_value(0.8),
            "uncertainty" => InjectionRequest::new(
                "protocol_ask_before_investigate",
                format!("uncertainty_spike_{value:.2}"),
                ContentType::Protocol,
                InjectionChannel::Skill,
                1500,
            )
            .with_value(0.7),
            _ => return,
        };

        if let Err(e) = self.request_injection(request).await {
            warn!(error = %e, "page fault injection failed");
        }
    }

    async fn on_goal_created(&self, event: &EpistemicEvent) {
        let goal_id = event.data["goal_id"].as_str().unwrap_or_default().to_string();
        let objective = event.data["objective"].as_str().unwrap_or("Unknown goal");
        let label: String = objective.chars().take(80).collect();

        let item = ContextItem::new(
            format!("goal_{goal_id}"),
            MemoryZone::Working,
            ContentType::Goal,
            label,
            200,
        )
        .with_source("goals-create")
        .with_channel(InjectionChannel::Mcp)
        .with_value(0.8)
        .pinned();

        if let Err(e) = self.register_item(item).await {
            warn!(error = %e, "failed to register goal item");
        }
    }

    async fn on_goal_completed(&self, event: &EpistemicEvent) {
        let goal_id = event.data["goal_id"].as_str().unwrap_or_default();
        let item_id = format!("goal_{goal_id}");
        let mut state = self.state.lock().await;
        if let Some(item) = state.inventory.get_mut(&item_id) {
            item.zone = MemoryZone::Cache;
            item.evictable = true;
            item.epistemic_value *= 0.3;
            info!(item_id = %item_id, "completed goal demoted to cache");
        }
    }

    async fn on_drift_detected(&self, event: &EpistemicEvent) {
        let request = InjectionRequest::new(
            "protocol_epistemic_conduct",
            format!("calibration_drift_detected_{}", event.session_id),
            ContentType::Protocol,
            InjectionChannel::Skill,
            3000,
        )
        .with_value(0.7);
        if let Err(e) = self.request_injection(request).await {
            warn!(error = %e, "drift protocol injection failed");
        }
    }
}

#[async_trait]
impl EpistemicObserver for ContextBudgetManager {
    fn name(&self) -> &str {
        "context_budget_manager"
    }

    async fn handle_event(&self, event: &EpistemicEvent) -> KernelResult<()> {
        match event.event_type {
            EventType::SessionStarted => {
                info!(session_id = %event.session_id, "budget manager: session started");
            }
            EventType::ConfidenceDropped => self.on_confidence_dropped(event).await,
            EventType::PostflightComplete => self.decay_pass().await,
            EventType::CalibrationDriftDetected => self.on_drift_detected(event).await,
            EventType::GoalCreated => self.on_goal_created(event).await,
            EventType::GoalCompleted => self.on_goal_completed(event).await,
            _ => {}
        }
        Ok(())
    }
}

/// Counters exposed to the dashboard.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InventorySummary {
    pub tokens_used: u64,
    pub tokens_available: u64,
    pub item_count: usize,
    pub anchor_tokens: u64,
    pub working_tokens: u64,
    pub cache_tokens: u64,
    pub page_faults: u64,
    pub evictions: u64,
}

struct EvictionPlan {
    ids: Vec<String>,
    summaries: Vec<ItemSummary>,
    tokens_freed: u64,
}

/// Choose lowest-priority evictable items (optionally zone-restricted) until
/// enough tokens are covered. Pure: does not mutate the inventory.
fn eviction_plan(
    inventory: &HashMap<String, ContextItem>,
    zone: Option<MemoryZone>,
    tokens_needed: u64,
    decay_rate: f64,
) -> EvictionPlan {
    let mut candidates: Vec<&ContextItem> = inventory
        .values()
        .filter(|item| item.evictable)
        .filter(|item| zone.is_none_or(|z| item.zone == z))
        .collect();
    candidates.sort_by(|a, b| {
        a.priority(decay_rate)
            .partial_cmp(&b.priority(decay_rate))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut plan = EvictionPlan {
        ids: Vec::new(),
        summaries: Vec::new(),
        tokens_freed: 0,
    };
    for item in candidates {
        if plan.tokens_freed >= tokens_needed {
            break;
        }
        plan.ids.push(item.id.clone());
        plan.summaries.push(summarize(item, decay_rate));
        plan.tokens_freed += item.estimated_tokens;
    }
    plan
}

fn summarize(item: &ContextItem, decay_rate: f64) -> ItemSummary {
    ItemSummary {
        id: item.id.clone(),
        label: item.label.clone(),
        zone: item.zone,
        estimated_tokens: item.estimated_tokens,
        priority: item.priority(decay_rate),
        evictable: item.evictable,
    }
}

fn zone_usage(inventory: &HashMap<String, ContextItem>, zone: MemoryZone) -> u64 {
    inventory
        .values()
        .filter(|item| item.zone == zone)
        .map(|item| item.estimated_tokens)
        .sum()
}

fn total_usage(inventory: &HashMap<String, ContextItem>) -> u64 {
    inventory.values().map(|item| item.estimated_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ContextBudgetManager {
        ContextBudgetManager::new(Uuid::new_v4(), BudgetThresholds::default(), EpistemicBus::new())
    }

    fn small_manager() -> ContextBudgetManager {
        let thresholds = BudgetThresholds {
            total_capacity: 1000,
            anchor_reserve: 200,
            working_set_target: 600,
            cache_limit: 200,
            ..BudgetThresholds::default()
        };
        ContextBudgetManager::new(Uuid::new_v4(), thresholds, EpistemicBus::new())
    }

    fn working_item(id: &str, tokens: u64, value: f64) -> ContextItem {
        ContextItem::new(id, MemoryZone::Working, ContentType::Finding, id, tokens)
            .with_value(value)
    }

    #[tokio::test]
    async fn test_register_within_budget() {
        let cbm = manager();
        assert!(cbm.register_item(working_item("a", 1000, 0.5)).await.unwrap());
        assert!(cbm.get_item("a").await.is_some());
    }

    #[tokio::test]
    async fn test_register_evicts_same_zone_to_make_room() {
        let cbm = small_manager();
        assert!(cbm.register_item(working_item("old", 500, 0.1)).await.unwrap());
        // 500 used of 600; a 400-token item needs 300 freed.
        assert!(cbm.register_item(working_item("new", 400, 0.9)).await.unwrap());
        assert!(cbm.get_item("old").await.is_none());
        assert!(cbm.get_item("new").await.is_some());
    }

    #[tokio::test]
    async fn test_register_rejects_without_mutating() {
        let cbm = small_manager();
        let pinned = ContextItem::new("pinned", MemoryZone::Working, ContentType::Goal, "g", 500)
            .pinned();
        assert!(cbm.register_item(pinned).await.unwrap());

        // Nothing evictable in the zone: oversized registration must fail
        // and leave the pinned item in place.
        assert!(!cbm.register_item(working_item("big", 400, 0.9)).await.unwrap());
        assert!(cbm.get_item("pinned").await.is_some());
        assert!(cbm.get_item("big").await.is_none());
    }

    #[tokio::test]
    async fn test_zone_capacity_invariant_after_success() {
        let cbm = small_manager();
        for i in 0..5 {
            let _ = cbm
                .register_item(working_item(&format!("i{i}"), 200, 0.5))
                .await
                .unwrap();
        }
        let report = cbm.budget_report().await;
        assert!(report.working_used <= 600);
    }

    #[tokio::test]
    async fn test_anchor_never_evicted() {
        let cbm = small_manager();
        let anchor = ContextItem::new(
            "anchor",
            MemoryZone::Anchor,
            ContentType::Calibration,
            "calibration",
            150,
        );
        assert!(cbm.register_item(anchor).await.unwrap());
        cbm.register_item(working_item("w", 500, 0.01)).await.unwrap();

        let result = cbm.evict_lowest_priority(10_000, "pressure").await;
        assert!(result.evicted.iter().all(|s| s.id != "anchor"));
        assert!(cbm.get_item("anchor").await.is_some());
    }

    #[tokio::test]
    async fn test_eviction_order_is_lowest_priority_first() {
        let cbm = manager();
        cbm.register_item(working_item("low", 100, 0.1)).await.unwrap();
        cbm.register_item(working_item("high", 100, 0.9)).await.unwrap();

        let result = cbm.evict_lowest_priority(100, "test").await;
        assert_eq!(result.evicted.len(), 1);
        assert_eq!(result.evicted[0].id, "low");
    }

    #[tokio::test]
    async fn test_unregister_round_trip() {
        let cbm = manager();
        cbm.register_item(working_item("x", 100, 0.5)).await.unwrap();
        let removed = cbm.unregister_item("x").await;
        assert!(removed.is_some());
        assert!(cbm.get_item("x").await.is_none());
        assert_eq!(cbm.inventory_summary().await.item_count, 0);
    }

    #[tokio::test]
    async fn test_find_items_ordered_by_priority() {
        let cbm = manager();
        cbm.register_item(working_item("low", 100, 0.2)).await.unwrap();
        cbm.register_item(working_item("high", 100, 0.9)).await.unwrap();

        let items = cbm.find_items(Some(MemoryZone::Working), None, None).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "high");
        assert_eq!(items[1].id, "low");
    }

    #[tokio::test]
    async fn test_injection_rejected_over_capacity() {
        let cbm = small_manager();
        cbm.register_item(working_item("base", 600, 0.9)).await.unwrap();
        cbm.register_item(
            ContextItem::new("c", MemoryZone::Cache, ContentType::Protocol, "c", 200)
                .with_value(0.9),
        )
        .await
        .unwrap();

        // 800 of 1000 used; a 300-token normal injection exceeds capacity.
        let request = InjectionRequest::new(
            "extra",
            "test",
            ContentType::Protocol,
            InjectionChannel::Direct,
            300,
        );
        assert!(!cbm.request_injection(request).await.unwrap());

        // The same request at critical priority evicts its way in.
        let critical = InjectionRequest::new(
            "extra",
            "test",
            ContentType::Protocol,
            InjectionChannel::Direct,
            300,
        )
        .critical();
        assert!(cbm.request_injection(critical).await.unwrap());
    }

    #[tokio::test]
    async fn test_page_fault_on_know_drop_registers_bootstrap() {
        let cbm = Arc::new(manager());
        let event = EpistemicEvent::new(
            EventType::ConfidenceDropped,
            "cascade",
            Uuid::new_v4(),
            json!({"vector": "know", "value": 0.25}),
        );
        cbm.handle_event(&event).await.unwrap();

        let bootstrap = cbm.get_item("project_bootstrap").await.unwrap();
        assert_eq!(bootstrap.estimated_tokens, 5000);
        assert!((bootstrap.epistemic_value - 0.8).abs() < 1e-9);
        assert_eq!(cbm.inventory_summary().await.page_faults, 1);
    }

    #[tokio::test]
    async fn test_uncertainty_spike_injects_protocol() {
        let cbm = manager();
        let event = EpistemicEvent::new(
            EventType::ConfidenceDropped,
            "cascade",
            Uuid::new_v4(),
            json!({"vector": "uncertainty", "value": 0.9}),
        );
        cbm.handle_event(&event).await.unwrap();

        let protocol = cbm.get_item("protocol_ask_before_investigate").await.unwrap();
        assert_eq!(protocol.estimated_tokens, 1500);
    }

    #[tokio::test]
    async fn test_handler_reregistration_overwrites() {
        use crate::domain::ports::InjectionHandler;
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingHandler(Arc<AtomicU32>);

        #[async_trait::async_trait]
        impl InjectionHandler for CountingHandler {
            async fn inject(&self, _: &InjectionRequest) -> KernelResult<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let cbm = manager();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        cbm.register_injection_handler(
            InjectionChannel::Skill,
            Arc::new(CountingHandler(first.clone())),
        )
        .await;
        cbm.register_injection_handler(
            InjectionChannel::Skill,
            Arc::new(CountingHandler(second.clone())),
        )
        .await;

        let request = InjectionRequest::new(
            "protocol_x",
            "test",
            ContentType::Protocol,
            InjectionChannel::Skill,
            100,
        );
        assert!(cbm.request_injection(request).await.unwrap());

        // Only the replacement handler delivered; no duplicate delivery.
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_goal_lifecycle_reactions() {
        let cbm = manager();
        let session_id = Uuid::new_v4();
        cbm.handle_event(&EpistemicEvent::new(
            EventType::GoalCreated,
            "goals",
            session_id,
            json!({"goal_id": "g1", "objective": "Refactor auth"}),
        ))
        .await
        .unwrap();

        let item = cbm.get_item("goal_g1").await.unwrap();
        assert_eq!(item.zone, MemoryZone::Working);
        assert!(!item.evictable);

        cbm.handle_event(&EpistemicEvent::new(
            EventType::GoalCompleted,
            "goals",
            session_id,
            json!({"goal_id": "g1"}),
        ))
        .await
        .unwrap();

        let item = cbm.get_item("goal_g1").await.unwrap();
        assert_eq!(item.zone, MemoryZone::Cache);
        assert!(item.evictable);
        assert!((item.epistemic_value - 0.24).abs() < 1e-9);
    }
}
