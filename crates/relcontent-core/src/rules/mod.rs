//! Content rules.
//!
//! Rules declare which related content is shown for which entity types:
//! relationship paths, property selectors with display overrides, nested
//! related content, categories and the modifiers that attach all of these to
//! entity types. Rules are plain data and deserialize from JSON.

mod path;
mod ruleset;
mod selector;
mod spec;

pub use path::{DepthRange, RelationshipPath, RelationshipStep};
pub use ruleset::{ContentRuleSet, ContentSelection, OrderedSpec};
pub use selector::{PropertyOverride, PropertySelector};
pub use spec::{CategorySpec, ContentModifier, RelatedContentSpec, RelationshipMeaning, RuleCondition};
