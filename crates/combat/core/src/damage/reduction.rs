//! Absolute damage reduction (`DR.*` flags).

use tracing::warn;

use super::{DamageDetail, DamageType};
use crate::config::DrStacking;
use crate::dice::{RollData, RollTerm, evaluate_terms, parse_terms, resolve_references};
use crate::document::{ActionType, ItemProperties, ItemSnapshot};
use crate::flags::ActorFlags;

/// Where a reduction value applies. Declaration order is evaluation order,
/// which breaks ties between equal values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrSource {
    All,
    AttackType(ActionType),
    DamageType(DamageType),
    NonMagical,
    NonMagicalPhysical,
    NonSilver,
    NonAdamantine,
    NonPhysical,
    Physical,
    /// Flat reduction after every per-type step; never type specific.
    Final,
}

impl DrSource {
    pub fn parse(key: &str) -> Self {
        match key {
            "all" => Self::All,
            "non-magical" => Self::NonMagical,
            "non-magical-physical" => Self::NonMagicalPhysical,
            "non-silver" => Self::NonSilver,
            "non-adamant" | "non-adamantine" => Self::NonAdamantine,
            "non-physical" => Self::NonPhysical,
            "physical" => Self::Physical,
            "final" => Self::Final,
            other => match other.parse::<ActionType>() {
                Ok(action) if action.is_attack() => Self::AttackType(action),
                _ => Self::DamageType(DamageType::from(other)),
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::All => 0,
            Self::AttackType(_) => 1,
            Self::DamageType(_) => 2,
            Self::NonMagical => 3,
            Self::NonMagicalPhysical => 4,
            Self::NonSilver => 5,
            Self::NonAdamantine => 6,
            Self::NonPhysical => 7,
            Self::Physical => 8,
            Self::Final => 9,
        }
    }

    fn applies(&self, damage_type: &DamageType, item: Option<&ItemSnapshot>) -> bool {
        let properties = item.map_or(ItemProperties::empty(), |item| item.properties);
        let physical = damage_type.is_physical();
        match self {
            Self::All => true,
            Self::AttackType(action) => item.is_some_and(|item| item.action_type == *action),
            Self::DamageType(declared) => declared == damage_type,
            Self::NonMagical => !properties.contains(ItemProperties::MAGICAL),
            Self::NonMagicalPhysical => physical && !properties.contains(ItemProperties::MAGICAL),
            Self::NonSilver => physical && !properties.contains(ItemProperties::SILVERED),
            Self::NonAdamantine => physical && !properties.contains(ItemProperties::ADAMANTINE),
            Self::NonPhysical => !physical,
            Self::Physical => physical,
            Self::Final => false,
        }
    }
}

/// Evaluates a reduction formula; anything malformed reduces by zero.
pub fn evaluate_dr_formula(formula: &str, data: &RollData) -> f64 {
    let parsed = resolve_references(formula, data).and_then(|resolved| parse_terms(&resolved));
    let result = parsed.and_then(|terms| {
        if terms.iter().any(|term| matches!(term, RollTerm::Dice(_))) {
            // Reduction is a fixed amount; dice are never rolled here.
            return Err(crate::dice::FormulaError::InvalidDice(formula.to_owned()));
        }
        evaluate_terms(&terms)
    });
    match result {
        Ok(value) if value.is_finite() => value,
        Ok(_) => 0.0,
        Err(error) => {
            warn!(
                target: "combat_core::damage",
                formula,
                %error,
                "damage reduction formula failed, reducing by zero"
            );
            0.0
        }
    }
}

/// Evaluated reduction values for one target.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReductionTable {
    /// Per-line sources sorted into evaluation order.
    sources: Vec<(DrSource, f64)>,
    final_dr: f64,
}

impl ReductionTable {
    pub fn from_flags(flags: &ActorFlags, data: &RollData) -> Self {
        let mut sources = Vec::new();
        let mut final_dr = 0.0;
        for (key, formula) in &flags.damage_reduction {
            let value = evaluate_dr_formula(formula, data);
            match DrSource::parse(key) {
                DrSource::Final => final_dr = value.max(0.0),
                source => sources.push((source, value)),
            }
        }
        sources.sort_by_key(|(source, _)| source.rank());
        Self { sources, final_dr }
    }

    pub fn with_source(mut self, source: DrSource, value: f64) -> Self {
        if source == DrSource::Final {
            self.final_dr = value.max(0.0);
        } else {
            self.sources.push((source, value));
            self.sources.sort_by_key(|(source, _)| source.rank());
        }
        self
    }

    pub fn final_dr(&self) -> f64 {
        self.final_dr
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.final_dr == 0.0
    }

    /// Highest applicable source for one line; the first wins a tie.
    pub fn line_dr(
        &self,
        damage_type: &DamageType,
        item: Option<&ItemSnapshot>,
        include_all: bool,
    ) -> f64 {
        let mut best: Option<f64> = None;
        for (source, value) in &self.sources {
            if !include_all && *source == DrSource::All {
                continue;
            }
            if source.applies(damage_type, item) && best.is_none_or(|current| *value > current) {
                best = Some(*value);
            }
        }
        best.unwrap_or(0.0)
    }

    fn all_pool(&self) -> f64 {
        self.sources
            .iter()
            .find(|(source, _)| *source == DrSource::All)
            .map_or(0.0, |(_, value)| value.max(0.0))
    }

    /// Writes the clamped `dr` of every damaging line.
    pub fn assign(
        &self,
        details: &mut [DamageDetail],
        item: Option<&ItemSnapshot>,
        stacking: DrStacking,
    ) {
        let include_all = stacking == DrStacking::HighestOnly;
        for detail in details.iter_mut() {
            if detail.damage_type.is_restorative() {
                detail.dr = None;
                continue;
            }
            let dr = self.line_dr(&detail.damage_type, item, include_all);
            detail.dr = Some(dr.clamp(0.0, detail.damage.max(0.0)));
        }

        if stacking == DrStacking::ApportionAll {
            let mut pool = self.all_pool();
            for detail in details.iter_mut() {
                if pool <= 0.0 {
                    break;
                }
                let Some(dr) = detail.dr.as_mut() else {
                    continue;
                };
                let headroom = (detail.damage - *dr).max(0.0);
                let take = pool.min(headroom);
                *dr += take;
                pool -= take;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(damage: f64, damage_type: DamageType) -> DamageDetail {
        DamageDetail::new(damage, damage_type)
    }

    fn table(pairs: &[(&str, &str)]) -> ReductionTable {
        let changes: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (format!("flags.combat.DR.{k}"), (*v).to_owned()))
            .collect();
        let flags = ActorFlags::from_changes(changes.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        ReductionTable::from_flags(&flags, &RollData::new().with("prof", 3.0))
    }

    #[test]
    fn parses_source_keys() {
        assert_eq!(DrSource::parse("mwak"), DrSource::AttackType(ActionType::Mwak));
        assert_eq!(DrSource::parse("fire"), DrSource::DamageType(DamageType::Fire));
        assert_eq!(DrSource::parse("non-adamant"), DrSource::NonAdamantine);
        assert_eq!(DrSource::parse("save"), DrSource::DamageType(DamageType::from("save")));
    }

    #[test]
    fn highest_applicable_source_wins() {
        let t = table(&[("all", "1"), ("fire", "2"), ("physical", "5")]);
        assert_eq!(t.line_dr(&DamageType::Fire, None, true), 2.0);
        assert_eq!(t.line_dr(&DamageType::Slashing, None, true), 5.0);
        assert_eq!(t.line_dr(&DamageType::Cold, None, true), 1.0);
    }

    #[test]
    fn formulas_resolve_references_and_fail_open() {
        let t = table(&[("fire", "@prof + 1"), ("cold", "@nope"), ("acid", "1d4")]);
        assert_eq!(t.line_dr(&DamageType::Fire, None, true), 4.0);
        assert_eq!(t.line_dr(&DamageType::Cold, None, true), 0.0);
        assert_eq!(t.line_dr(&DamageType::Acid, None, true), 0.0);
    }

    #[test]
    fn dr_is_clamped_to_line_damage() {
        let t = table(&[("fire", "10")]);
        let mut details = vec![detail(4.0, DamageType::Fire)];
        t.assign(&mut details, None, DrStacking::HighestOnly);
        assert_eq!(details[0].dr, Some(4.0));
    }

    #[test]
    fn apportion_spends_all_pool_across_lines() {
        let t = table(&[("all", "5"), ("fire", "2")]);
        let mut details = vec![
            detail(3.0, DamageType::Fire),
            detail(6.0, DamageType::Slashing),
        ];
        t.assign(&mut details, None, DrStacking::ApportionAll);
        // Fire: 2 specific + 1 from the pool fills its headroom; slashing gets the rest.
        assert_eq!(details[0].dr, Some(3.0));
        assert_eq!(details[1].dr, Some(4.0));

        let mut highest = vec![
            detail(3.0, DamageType::Fire),
            detail(6.0, DamageType::Slashing),
        ];
        t.assign(&mut highest, None, DrStacking::HighestOnly);
        assert_eq!(highest[0].dr, Some(3.0));
        assert_eq!(highest[1].dr, Some(5.0));
    }

    #[test]
    fn restorative_lines_are_never_reduced() {
        let t = table(&[("all", "5")]);
        let mut details = vec![detail(8.0, DamageType::Healing)];
        t.assign(&mut details, None, DrStacking::HighestOnly);
        assert_eq!(details[0].dr, None);
    }

    #[test]
    fn final_dr_is_kept_apart() {
        let t = table(&[("final", "3")]);
        assert_eq!(t.final_dr(), 3.0);
        assert_eq!(t.line_dr(&DamageType::Fire, None, true), 0.0);
    }
}
