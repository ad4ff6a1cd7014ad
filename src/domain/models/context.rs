//! Context Budget Manager data model: zones, items, thresholds, reports.
//!
//! The context window is treated as paged memory. Each `ContextItem` is a
//! page with an address (id), size (estimated tokens), replacement priority,
//! and a zone that determines its eviction willingness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Context window memory zones, in decreasing priority and increasing
/// eviction willingness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryZone {
    /// Always resident; never evicted.
    Anchor,
    /// Active task context, managed by priority.
    Working,
    /// Preloaded but evictable; evicted first under pressure.
    Cache,
}

impl MemoryZone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anchor => "anchor",
            Self::Working => "working",
            Self::Cache => "cache",
        }
    }

    /// Zone weight in the priority formula.
    pub const fn weight(&self) -> f64 {
        match self {
            Self::Anchor => 100.0,
            Self::Working => 1.0,
            Self::Cache => 0.5,
        }
    }
}

/// What kind of content a context item holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Calibration,
    Protocol,
    Finding,
    Unknown,
    DeadEnd,
    Goal,
    Code,
    Conversation,
    Skill,
    Bootstrap,
    SystemPrompt,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calibration => "calibration",
            Self::Protocol => "protocol",
            Self::Finding => "finding",
            Self::Unknown => "unknown",
            Self::DeadEnd => "dead_end",
            Self::Goal => "goal",
            Self::Code => "code",
            Self::Conversation => "conversation",
            Self::Skill => "skill",
            Self::Bootstrap => "bootstrap",
            Self::SystemPrompt => "system_prompt",
        }
    }
}

/// How content enters the context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionChannel {
    Hook,
    Skill,
    Mcp,
    Direct,
    Implicit,
}

impl InjectionChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hook => "hook",
            Self::Skill => "skill",
            Self::Mcp => "mcp",
            Self::Direct => "direct",
            Self::Implicit => "implicit",
        }
    }
}

/// A single item occupying space in the context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    pub zone: MemoryZone,
    pub content_type: ContentType,
    pub source: String,
    pub channel: InjectionChannel,
    pub label: String,
    pub estimated_tokens: u64,
    pub epistemic_value: f64,
    pub reference_count: u32,
    pub injected_at: DateTime<Utc>,
    pub last_referenced: DateTime<Utc>,
    pub evictable: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ContextItem {
    pub fn new(
        id: impl Into<String>,
        zone: MemoryZone,
        content_type: ContentType,
        label: impl Into<String>,
        estimated_tokens: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            zone,
            content_type,
            source: String::new(),
            channel: InjectionChannel::Direct,
            label: label.into(),
            estimated_tokens,
            epistemic_value: 0.5,
            reference_count: 0,
            injected_at: now,
            last_referenced: now,
            // Anchor pages are pinned from the moment they are mapped.
            evictable: zone != MemoryZone::Anchor,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_channel(mut self, channel: InjectionChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_value(mut self, epistemic_value: f64) -> Self {
        self.epistemic_value = epistemic_value.clamp(0.0, 1.0);
        self
    }

    pub fn pinned(mut self) -> Self {
        self.evictable = false;
        self
    }

    /// Seconds since last reference.
    pub fn idle_seconds(&self) -> f64 {
        (Utc::now() - self.last_referenced).num_milliseconds() as f64 / 1000.0
    }

    /// Eviction priority: higher = more important = evict last.
    ///
    /// `epistemic_value * exp(-decay_rate * idle_minutes) * (ln(1 + refs) + 1) * zone_weight`
    ///
    /// Idle time is converted to minutes before the exponent; this matches
    /// historical data and must not change.
    pub fn priority(&self, decay_rate: f64) -> f64 {
        let idle_minutes = self.idle_seconds().max(0.0) / 60.0;
        let recency = (-decay_rate * idle_minutes).exp();
        let ref_factor = (1.0 + f64::from(self.reference_count)).ln() + 1.0;
        self.epistemic_value * recency * ref_factor * self.zone.weight()
    }

    /// Mark as recently referenced (LRU bookkeeping).
    pub fn touch(&mut self) {
        self.last_referenced = Utc::now();
        self.reference_count += 1;
    }
}

/// Human-tunable thresholds, like sysctl vm.* parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetThresholds {
    pub total_capacity: u64,
    pub anchor_reserve: u64,
    pub working_set_target: u64,
    pub cache_limit: u64,
    pub eviction_aggressiveness: f64,
    pub decay_rate: f64,
    pub min_priority_threshold: f64,
    pub pressure_threshold: f64,
}

impl Default for BudgetThresholds {
    fn default() -> Self {
        Self {
            total_capacity: 200_000,
            anchor_reserve: 15_000,
            working_set_target: 150_000,
            cache_limit: 35_000,
            eviction_aggressiveness: 0.5,
            decay_rate: 0.1,
            min_priority_threshold: 0.05,
            pressure_threshold: 0.85,
        }
    }
}

impl BudgetThresholds {
    pub const fn zone_budget(&self, zone: MemoryZone) -> u64 {
        match zone {
            MemoryZone::Anchor => self.anchor_reserve,
            MemoryZone::Working => self.working_set_target,
            MemoryZone::Cache => self.cache_limit,
        }
    }
}

/// Compact view of an item for budget reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: String,
    pub label: String,
    pub zone: MemoryZone,
    pub estimated_tokens: u64,
    pub priority: f64,
    pub evictable: bool,
}

/// Snapshot of current budget state, like /proc/meminfo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetReport {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub total_capacity: u64,
    pub total_used: u64,
    pub total_available: u64,
    pub utilization: f64,
    pub anchor_used: u64,
    pub anchor_limit: u64,
    pub working_used: u64,
    pub working_target: u64,
    pub cache_used: u64,
    pub cache_limit: u64,
    pub total_items: usize,
    pub anchor_items: usize,
    pub working_items: usize,
    pub cache_items: usize,
    pub under_pressure: bool,
    pub eviction_candidates: usize,
    pub top_items: Vec<ItemSummary>,
    pub bottom_items: Vec<ItemSummary>,
}

/// Result of an eviction pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionResult {
    pub evicted: Vec<ItemSummary>,
    pub tokens_freed: u64,
    pub reason: String,
    pub triggered_by: String,
}

/// Injection priority classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPriority {
    Critical,
    Normal,
    Low,
}

/// Request to inject content into the context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionRequest {
    pub content_id: String,
    pub reason: String,
    pub content_type: ContentType,
    pub preferred_channel: InjectionChannel,
    pub estimated_tokens: u64,
    pub epistemic_value: f64,
    pub priority: InjectionPriority,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl InjectionRequest {
    pub fn new(
        content_id: impl Into<String>,
        reason: impl Into<String>,
        content_type: ContentType,
        channel: InjectionChannel,
        estimated_tokens: u64,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            reason: reason.into(),
            content_type,
            preferred_channel: channel,
            estimated_tokens,
            epistemic_value: 0.5,
            priority: InjectionPriority::Normal,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.epistemic_value = value.clamp(0.0, 1.0);
        self
    }

    pub fn critical(mut self) -> Self {
        self.priority = InjectionPriority::Critical;
        self
    }
}

/// Estimate token count for a text string, ~4 chars per token.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    ((text.len() / 4).max(1)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_items_pinned_at_creation() {
        let item = ContextItem::new(
            "claude_md",
            MemoryZone::Anchor,
            ContentType::SystemPrompt,
            "CLAUDE.md",
            4000,
        );
        assert!(!item.evictable);

        let working = ContextItem::new("w", MemoryZone::Working, ContentType::Code, "code", 100);
        assert!(working.evictable);
    }

    #[test]
    fn test_priority_zone_ordering() {
        let decay = 0.1;
        let anchor = ContextItem::new("a", MemoryZone::Anchor, ContentType::Calibration, "a", 10);
        let working = ContextItem::new("w", MemoryZone::Working, ContentType::Code, "w", 10);
        let cache = ContextItem::new("c", MemoryZone::Cache, ContentType::Protocol, "c", 10);
        assert!(anchor.priority(decay) > working.priority(decay));
        assert!(working.priority(decay) > cache.priority(decay));
    }

    #[test]
    fn test_touch_raises_priority() {
        let mut item = ContextItem::new("x", MemoryZone::Working, ContentType::Finding, "f", 10);
        let before = item.priority(0.1);
        item.touch();
        item.touch();
        assert!(item.priority(0.1) > before);
        assert_eq!(item.reference_count, 2);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_threshold_defaults() {
        let t = BudgetThresholds::default();
        assert_eq!(t.total_capacity, 200_000);
        assert_eq!(t.zone_budget(MemoryZone::Anchor), 15_000);
        assert_eq!(t.zone_budget(MemoryZone::Working), 150_000);
        assert_eq!(t.zone_budget(MemoryZone::Cache), 35_000);
    }
}
