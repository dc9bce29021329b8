//! Merge engine.
//!
//! Two merge axes share one algebra: equal values are kept, differing
//! values become null with the "varies" display label and the field's
//! unique name is recorded as merged.
//!
//! - To-many collapse folds the items of a duplicate-sensitive nested field
//!   into one item.
//! - Cross-instance merge folds several records into one.

use crate::config::EngineConfig;
use crate::descriptor::ContentDescriptor;
use relcontent_proto::{ContentRecord, DisplayValue, NestedItem, RecordError, RecordValue};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Merges record values.
pub struct MergeEngine<'a> {
    descriptor: &'a ContentDescriptor,
    config: &'a EngineConfig,
}

impl<'a> MergeEngine<'a> {
    /// Create a merge engine.
    pub fn new(descriptor: &'a ContentDescriptor, config: &'a EngineConfig) -> Self {
        Self { descriptor, config }
    }

    /// Collapse the to-many values of duplicate-sensitive nested fields,
    /// at every nesting level.
    pub fn collapse_related(&self, record: &mut ContentRecord) {
        if !self.config.collapse_related_instances {
            return;
        }
        self.collapse_values(
            &mut record.values,
            &mut record.display_values,
            &mut record.merged_field_names,
        );
    }

    fn collapse_values(
        &self,
        values: &mut BTreeMap<String, RecordValue>,
        display_values: &mut BTreeMap<String, DisplayValue>,
        merged: &mut BTreeSet<String>,
    ) {
        for (name, value) in values.iter_mut() {
            let Some(nested) = self.descriptor.field_by_name(name).and_then(|f| f.as_nested()) else {
                continue;
            };

            match value {
                RecordValue::Array(items) => {
                    for item in items.iter_mut() {
                        self.collapse_values(
                            &mut item.values,
                            &mut item.display_values,
                            &mut item.merged_field_names,
                        );
                    }
                    if !nested.merge_related_instances || items.len() < 2 {
                        continue;
                    }
                    let (item, differed) = self.merge_items(items);
                    trace!(field = %name, items = items.len(), differed, "collapsed related instances");
                    *items = vec![item];
                    if differed {
                        merged.insert(name.clone());
                        display_values.insert(name.clone(), self.varies());
                    }
                }
                RecordValue::Struct(item) => self.collapse_values(
                    &mut item.values,
                    &mut item.display_values,
                    &mut item.merged_field_names,
                ),
                RecordValue::Scalar(_) => {}
            }
        }
    }

    /// Merge records into one. Returns `None` for an empty input.
    pub fn merge(&self, records: &[ContentRecord]) -> Option<ContentRecord> {
        match records {
            [] => None,
            [single] => Some(single.clone()),
            _ => {
                let items: Vec<NestedItem> = records.iter().map(as_item).collect();
                let (item, _) = self.merge_items(&items);

                let mut errors: Vec<RecordError> = Vec::new();
                for error in records.iter().flat_map(|r| &r.errors) {
                    if !errors.contains(error) {
                        errors.push(error.clone());
                    }
                }
                Some(ContentRecord {
                    primary_keys: item.primary_keys,
                    values: item.values,
                    display_values: item.display_values,
                    merged_field_names: item.merged_field_names,
                    errors,
                })
            }
        }
    }

    /// Merge all records into at most one.
    pub fn merge_all(&self, records: Vec<ContentRecord>) -> Vec<ContentRecord> {
        if records.len() < 2 {
            return records;
        }
        self.merge(&records).into_iter().collect()
    }

    /// Fold items into one. Also reports whether any value differed.
    fn merge_items(&self, items: &[NestedItem]) -> (NestedItem, bool) {
        let mut merged = NestedItem::default();
        let mut differed = false;

        let mut seen = BTreeSet::new();
        for key in items.iter().flat_map(|i| &i.primary_keys) {
            if seen.insert(key) {
                merged.primary_keys.push(key.clone());
            }
        }
        for item in items {
            merged
                .merged_field_names
                .extend(item.merged_field_names.iter().cloned());
        }

        let names: BTreeSet<&String> = items.iter().flat_map(|i| i.values.keys()).collect();
        let null = RecordValue::null();
        for name in names {
            let values: Vec<&RecordValue> = items
                .iter()
                .map(|i| i.values.get(name).unwrap_or(&null))
                .collect();

            let (value, display, varies) = self.merge_value(&values, || {
                items
                    .first()
                    .and_then(|i| i.display_values.get(name))
                    .cloned()
            });
            if varies {
                differed = true;
                merged.merged_field_names.insert(name.clone());
            }
            merged.insert(name.clone(), value, display);
        }
        (merged, differed)
    }

    fn merge_value(
        &self,
        values: &[&RecordValue],
        first_display: impl FnOnce() -> Option<DisplayValue>,
    ) -> (RecordValue, DisplayValue, bool) {
        let Some(&first) = values.first() else {
            return (RecordValue::null(), DisplayValue::Null, false);
        };

        if values.iter().all(|v| matches!(v, RecordValue::Scalar(_))) {
            return if values.iter().all(|v| *v == first) {
                let display = match first {
                    RecordValue::Scalar(scalar) => first_display().unwrap_or_else(|| DisplayValue::of(scalar)),
                    _ => DisplayValue::Null,
                };
                (first.clone(), display, false)
            } else {
                self.varies_value()
            };
        }

        // Single items on every side merge item-wise.
        let singles: Option<Vec<&NestedItem>> = values
            .iter()
            .map(|v| match v {
                RecordValue::Struct(item) => Some(item),
                RecordValue::Array(items) if items.len() == 1 => items.first(),
                _ => None,
            })
            .collect();
        if let Some(singles) = singles {
            let owned: Vec<NestedItem> = singles.into_iter().cloned().collect();
            let (item, differed) = self.merge_items(&owned);
            let value = if matches!(first, RecordValue::Struct(_)) {
                RecordValue::Struct(item)
            } else {
                RecordValue::Array(vec![item])
            };
            return (value, DisplayValue::Null, differed);
        }

        // Arrays with the same content merge positionally.
        if let RecordValue::Array(head) = first {
            let same = values.iter().all(|v| match v {
                RecordValue::Array(items) => {
                    items.len() == head.len() && items.iter().zip(head).all(|(a, b)| same_content(a, b))
                }
                _ => false,
            });
            if same {
                let merged = (0..head.len())
                    .map(|index| {
                        let column: Vec<NestedItem> = values
                            .iter()
                            .flat_map(|v| v.items().get(index))
                            .cloned()
                            .collect();
                        self.merge_items(&column).0
                    })
                    .collect();
                return (RecordValue::Array(merged), DisplayValue::Null, false);
            }
        }

        self.varies_value()
    }

    fn varies(&self) -> DisplayValue {
        DisplayValue::Text(self.config.varies_label.clone())
    }

    fn varies_value(&self) -> (RecordValue, DisplayValue, bool) {
        (RecordValue::null(), self.varies(), true)
    }
}

fn as_item(record: &ContentRecord) -> NestedItem {
    NestedItem {
        primary_keys: record.primary_keys.clone(),
        values: record.values.clone(),
        display_values: record.display_values.clone(),
        merged_field_names: record.merged_field_names.clone(),
    }
}

/// Compare two items by their values only, ignoring the instances they
/// were built from.
fn same_content(a: &NestedItem, b: &NestedItem) -> bool {
    let null = RecordValue::null();
    let names: BTreeSet<&String> = a.values.keys().chain(b.values.keys()).collect();
    names.into_iter().all(|name| {
        same_value(
            a.values.get(name).unwrap_or(&null),
            b.values.get(name).unwrap_or(&null),
        )
    })
}

fn same_value(a: &RecordValue, b: &RecordValue) -> bool {
    match (a, b) {
        (RecordValue::Scalar(a), RecordValue::Scalar(b)) => a == b,
        (RecordValue::Struct(a), RecordValue::Struct(b)) => same_content(a, b),
        (RecordValue::Array(a), RecordValue::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same_content(a, b))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EndpointDef, EntityTypeDef, Multiplicity, PropertyDef, RelationshipTypeDef, ScalarType, SchemaBundle};
    use crate::descriptor::{DescriptorBuilder, DescriptorRequest};
    use crate::rules::{ContentModifier, ContentRuleSet, RelatedContentSpec, RelationshipStep};
    use relcontent_proto::{InstanceKey, Value};

    struct Fixture {
        descriptor: ContentDescriptor,
        config: EngineConfig,
        aspects: String,
        prop: String,
        code: String,
    }

    fn fixture() -> Fixture {
        let schema = SchemaBundle::new(1)
            .with_entity(
                EntityTypeDef::new("Element")
                    .with_property(PropertyDef::new("CodeValue", ScalarType::String)),
            )
            .with_entity(
                EntityTypeDef::new("Aspect")
                    .with_property(PropertyDef::new("Prop", ScalarType::Int64)),
            )
            .with_relationship(RelationshipTypeDef::new(
                "ElementOwnsAspects",
                EndpointDef::new("Element", Multiplicity::ExactlyOne),
                EndpointDef::new("Aspect", Multiplicity::ZeroOrMany),
            ));
        let rules = ContentRuleSet::new("rules").with_modifier(
            ContentModifier::new("Element").with_related(
                RelatedContentSpec::new(RelationshipStep::forward("ElementOwnsAspects"))
                    .merge_related_instances(),
            ),
        );
        let config = EngineConfig::default();
        let descriptor = DescriptorBuilder::new(&schema, &rules, &config)
            .build(&DescriptorRequest::new(["Element"]))
            .unwrap()
            .descriptor;

        let name = |label: &str| {
            descriptor
                .fields()
                .iter()
                .find(|f| f.label == label)
                .map(|f| f.name.clone())
                .unwrap()
        };
        let prop = name("Prop");
        let code = name("CodeValue");
        let aspects = descriptor
            .fields()
            .iter()
            .find(|f| f.as_nested().is_some())
            .map(|f| f.name.clone())
            .unwrap();
        Fixture {
            descriptor,
            config,
            aspects,
            prop,
            code,
        }
    }

    fn aspect(f: &Fixture, id: u64, prop: i64) -> NestedItem {
        let mut item = NestedItem::new(InstanceKey::new("Aspect", id));
        item.insert(f.prop.clone(), Value::Int64(prop).into(), DisplayValue::of(&Value::Int64(prop)));
        item
    }

    fn record(f: &Fixture, id: u64, code: &str, aspects: Vec<NestedItem>) -> ContentRecord {
        let mut record = ContentRecord::new(InstanceKey::new("Element", id));
        record.insert(f.code.clone(), Value::from(code).into(), DisplayValue::Text(code.into()));
        record.insert(f.aspects.clone(), RecordValue::Array(aspects), DisplayValue::Null);
        record
    }

    #[test]
    fn test_merge_empty_and_single() {
        let f = fixture();
        let engine = MergeEngine::new(&f.descriptor, &f.config);
        assert!(engine.merge(&[]).is_none());
        assert!(engine.merge_all(Vec::new()).is_empty());

        let single = record(&f, 1, "A", vec![]);
        assert_eq!(engine.merge(&[single.clone()]), Some(single));
    }

    #[test]
    fn test_merge_equal_and_varies_per_field() {
        let f = fixture();
        let engine = MergeEngine::new(&f.descriptor, &f.config);

        let a = record(&f, 1, "A", vec![aspect(&f, 10, 7)]);
        let b = record(&f, 2, "B", vec![aspect(&f, 11, 7)]);
        let merged = engine.merge(&[a, b]).unwrap();

        assert_eq!(merged.primary_keys.len(), 2);
        assert!(merged.value(&f.code).unwrap().is_null());
        assert_eq!(merged.display(&f.code), Some(&DisplayValue::Text("Varies".into())));
        assert!(merged.is_merged(&f.code));

        let items = merged.value(&f.aspects).unwrap().items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].primary_keys.len(), 2);
        assert_eq!(items[0].value(&f.prop), Some(&RecordValue::Scalar(Value::Int64(7))));
        assert!(!merged.is_merged(&f.aspects));
    }

    #[test]
    fn test_merge_single_items_that_differ() {
        let f = fixture();
        let engine = MergeEngine::new(&f.descriptor, &f.config);

        let a = record(&f, 1, "A", vec![aspect(&f, 10, 1)]);
        let b = record(&f, 2, "A", vec![aspect(&f, 11, 2)]);
        let merged = engine.merge(&[a, b]).unwrap();

        assert!(!merged.is_merged(&f.code));
        assert!(merged.is_merged(&f.aspects));
        let item = &merged.value(&f.aspects).unwrap().items()[0];
        assert!(item.value(&f.prop).unwrap().is_null());
        assert!(item.merged_field_names.contains(&f.prop));
    }

    #[test]
    fn test_merge_array_length_mismatch_varies() {
        let f = fixture();
        let engine = MergeEngine::new(&f.descriptor, &f.config);

        let a = record(&f, 1, "A", vec![aspect(&f, 10, 1), aspect(&f, 12, 2)]);
        let b = record(&f, 2, "A", vec![]);
        let merged = engine.merge(&[a, b]).unwrap();

        assert!(merged.value(&f.aspects).unwrap().is_null());
        assert_eq!(merged.display(&f.aspects), Some(&DisplayValue::Text("Varies".into())));
        assert!(merged.is_merged(&f.aspects));
    }

    #[test]
    fn test_merge_absent_field_compares_as_null() {
        let f = fixture();
        let engine = MergeEngine::new(&f.descriptor, &f.config);

        let mut a = ContentRecord::new(InstanceKey::new("Element", 1));
        a.insert(f.code.clone(), RecordValue::null(), DisplayValue::Null);
        let b = ContentRecord::new(InstanceKey::new("Other", 2));
        let merged = engine.merge(&[a, b]).unwrap();

        assert!(merged.value(&f.code).unwrap().is_null());
        assert!(!merged.is_merged(&f.code));
    }

    #[test]
    fn test_collapse_related_equal_values() {
        let f = fixture();
        let engine = MergeEngine::new(&f.descriptor, &f.config);

        let mut rec = record(&f, 1, "A", vec![aspect(&f, 10, 3), aspect(&f, 11, 3)]);
        engine.collapse_related(&mut rec);

        let value = rec.value(&f.aspects).unwrap();
        assert_eq!(value.items()[0].primary_keys.len(), 2);
        assert_eq!(value.items()[0].value(&f.prop), Some(&RecordValue::Scalar(Value::Int64(3))));
        assert!(!rec.is_merged(&f.aspects));
    }

    #[test]
    fn test_collapse_related_differing_values() {
        let f = fixture();
        let engine = MergeEngine::new(&f.descriptor, &f.config);

        let mut rec = record(&f, 1, "A", vec![aspect(&f, 10, 3), aspect(&f, 11, 4)]);
        engine.collapse_related(&mut rec);

        let items = rec.value(&f.aspects).unwrap().items();
        assert_eq!(items.len(), 1);
        assert!(items[0].value(&f.prop).unwrap().is_null());
        assert_eq!(items[0].display(&f.prop), Some(&DisplayValue::Text("Varies".into())));
        assert!(rec.is_merged(&f.aspects));
    }

    #[test]
    fn test_collapse_disabled_by_config() {
        let mut f = fixture();
        f.config = EngineConfig::default().collapse_related_instances(false);
        let engine = MergeEngine::new(&f.descriptor, &f.config);

        let mut rec = record(&f, 1, "A", vec![aspect(&f, 10, 3), aspect(&f, 11, 4)]);
        engine.collapse_related(&mut rec);
        assert_eq!(rec.value(&f.aspects).unwrap().items().len(), 2);
    }
}
