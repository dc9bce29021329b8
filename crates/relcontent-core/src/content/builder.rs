//! Record builder.
//!
//! Realizes a descriptor for a list of instances. Rows are processed in
//! chunks; within a chunk every field level is populated for all rows at
//! once, so the provider sees one related-instances call per path step and
//! one property call per content type and level, never one call per row.

use super::cancel::CancellationToken;
use super::merge::MergeEngine;
use super::provider::{InstanceProvider, RelatedInstance};
use super::traversal::{dedup, Traversal};
use crate::config::EngineConfig;
use crate::descriptor::{
    ContentClass, ContentDescriptor, Field, FieldId, FieldKind, FieldStep, NestedContentField, RowSource,
};
use crate::error::Error;
use relcontent_proto::{ContentRecord, DisplayValue, InstanceKey, NestedItem, RecordError, RecordValue, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, instrument, warn};

/// Instances to build records for.
#[derive(Debug, Clone, Default)]
pub struct RecordsRequest {
    pub instances: Vec<InstanceKey>,
    /// Merge all records into one.
    pub merge_results: bool,
    pub cancel: Option<CancellationToken>,
}

impl RecordsRequest {
    /// Request one record per instance.
    pub fn new(instances: Vec<InstanceKey>) -> Self {
        Self {
            instances,
            merge_results: false,
            cancel: None,
        }
    }

    /// Merge the records into one.
    pub fn merged(mut self) -> Self {
        self.merge_results = true;
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Built records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordSet {
    pub records: Vec<ContentRecord>,
    /// Errors that belong to no single record, such as a failed expansion of
    /// the requested instances into rows.
    pub errors: Vec<RecordError>,
}

impl RecordSet {
    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no record was built.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Builds content records from a descriptor.
pub struct RecordBuilder<'a> {
    descriptor: &'a ContentDescriptor,
    provider: &'a dyn InstanceProvider,
    config: &'a EngineConfig,
}

impl<'a> RecordBuilder<'a> {
    /// Create a record builder.
    pub fn new(
        descriptor: &'a ContentDescriptor,
        provider: &'a dyn InstanceProvider,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            descriptor,
            provider,
            config,
        }
    }

    /// Build records.
    ///
    /// Provider failures and recursion overflows are attached to the
    /// affected records. Fails only on cancellation, in which case no
    /// records are returned.
    #[instrument(skip_all, fields(instances = request.instances.len(), merge = request.merge_results))]
    pub fn build(&self, request: &RecordsRequest) -> Result<RecordSet, Error> {
        let batch_size = self.config.effective_batch_size();
        let traversal = Traversal::new(self.provider, batch_size, request.cancel.as_ref());
        let merge = MergeEngine::new(self.descriptor, self.config);

        let mut set = RecordSet::default();
        let rows = match self.descriptor.row_source() {
            RowSource::Requested => dedup(&request.instances),
            RowSource::Related { steps } => {
                self.select_rows(&traversal, &request.instances, steps, &mut set.errors)?
            }
            RowSource::Classes => self.class_rows(&mut set.errors),
        };

        for chunk in rows.chunks(batch_size) {
            let mut items: Vec<NestedItem> = chunk.iter().cloned().map(NestedItem::new).collect();
            let links = vec![BTreeMap::new(); chunk.len()];
            let owners: Vec<usize> = (0..chunk.len()).collect();
            let mut errors = vec![Vec::new(); chunk.len()];

            self.fill(&traversal, &mut items, &links, &owners, self.descriptor.roots(), &mut errors)?;

            for (item, errors) in items.into_iter().zip(errors) {
                let mut record = ContentRecord {
                    primary_keys: item.primary_keys,
                    values: item.values,
                    display_values: item.display_values,
                    merged_field_names: item.merged_field_names,
                    errors,
                };
                merge.collapse_related(&mut record);
                set.records.push(record);
            }
        }

        if request.merge_results {
            set.records = merge.merge_all(set.records);
        }
        debug!(records = set.records.len(), errors = set.errors.len(), "records built");
        Ok(set)
    }

    /// Every instance of the descriptor's row types.
    fn class_rows(&self, errors: &mut Vec<RecordError>) -> Vec<InstanceKey> {
        let classes = self.descriptor.row_types();
        if classes.is_empty() {
            return Vec::new();
        }
        match self.provider.fetch_instances_of(classes) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "listing instances of row classes failed");
                errors.push(RecordError::TraversalFailure {
                    field: None,
                    message: e.message,
                });
                Vec::new()
            }
        }
    }

    /// Expand the requested instances into row instances.
    fn select_rows(
        &self,
        traversal: &Traversal<'_>,
        instances: &[InstanceKey],
        steps: &[FieldStep],
        errors: &mut Vec<RecordError>,
    ) -> Result<Vec<InstanceKey>, Error> {
        if steps.is_empty() {
            return Ok(Vec::new());
        }

        let mut current = dedup(instances);
        for step in steps {
            if current.is_empty() {
                break;
            }
            let hop = self.hop(traversal, &current, step)?;
            for source in &current {
                let Some(error) = hop.failed.get(source) else { continue };
                warn!(source = %source, error = %error, "row selection failed");
                let error = RecordError::TraversalFailure {
                    field: None,
                    message: failure_message(error.clone()),
                };
                if !errors.contains(&error) {
                    errors.push(error);
                }
            }
            for origin in hop.overflowed {
                errors.push(RecordError::RecursionOverflow {
                    field: None,
                    origin,
                    max_hops: self.config.max_recursion_hops,
                });
            }

            let mut seen = HashSet::new();
            let mut next = Vec::new();
            for source in &current {
                for target in hop.reached.get(source).into_iter().flatten() {
                    if step.target_types.contains(&target.key.class) && seen.insert(target.key.clone()) {
                        next.push(target.key.clone());
                    }
                }
            }
            current = next;
        }
        Ok(current)
    }

    /// One path step for a set of sources, expanded breadth-first when the
    /// step is recursive. Fails only on cancellation.
    fn hop(&self, traversal: &Traversal<'_>, sources: &[InstanceKey], step: &FieldStep) -> Result<Hop, Error> {
        let request = step.traversal_step();
        if step.depth.is_recursive() {
            let expansion =
                traversal.expand(sources, &request, step.depth, self.config.max_recursion_hops)?;
            Ok(Hop {
                reached: expansion.reached,
                overflowed: expansion.overflowed,
                failed: expansion.failed.into_iter().collect(),
            })
        } else {
            let fetched = traversal.fetch_related(sources, &request)?;
            let failed = fetched
                .failed_keys()
                .map(|(key, error)| (key.clone(), error.clone()))
                .collect();
            Ok(Hop {
                reached: fetched.found,
                overflowed: Vec::new(),
                failed,
            })
        }
    }

    /// Populate `fields` on every item. `owners[i]` is the row that item `i`
    /// belongs to; `links[i]` holds the relationship-own values of the link
    /// that reached it.
    fn fill(
        &self,
        traversal: &Traversal<'_>,
        items: &mut [NestedItem],
        links: &[BTreeMap<String, Value>],
        owners: &[usize],
        fields: &[FieldId],
        errors: &mut [Vec<RecordError>],
    ) -> Result<(), Error> {
        if items.is_empty() || fields.is_empty() {
            return Ok(());
        }
        let fields: Vec<&Field> = fields
            .iter()
            .filter_map(|&id| self.descriptor.field(id))
            .collect();

        let values = self.fetch_values(traversal, items, owners, &fields, errors)?;

        for field in &fields {
            match &field.kind {
                FieldKind::Properties(properties) => {
                    for (index, item) in items.iter_mut().enumerate() {
                        let value = match &properties.content {
                            ContentClass::Entity(_) => item
                                .primary_keys
                                .first()
                                .and_then(|key| {
                                    let property = properties.property_for(&key.class)?;
                                    values.get(key)?.get(property)
                                })
                                .cloned()
                                .unwrap_or(Value::Null),
                            ContentClass::Relationship(_) => links
                                .get(index)
                                .and_then(|l| l.get(&properties.property))
                                .cloned()
                                .unwrap_or(Value::Null),
                        };
                        let display = DisplayValue::of(&value);
                        item.insert(field.name.clone(), value.into(), display);
                    }
                }
                FieldKind::Nested(nested) => {
                    self.fill_nested(traversal, items, owners, field, nested, errors)?;
                }
            }
        }
        Ok(())
    }

    /// Fetch the entity property values needed by `fields`, one provider
    /// call per concrete type.
    fn fetch_values(
        &self,
        traversal: &Traversal<'_>,
        items: &[NestedItem],
        owners: &[usize],
        fields: &[&Field],
        errors: &mut [Vec<RecordError>],
    ) -> Result<HashMap<InstanceKey, BTreeMap<String, Value>>, Error> {
        let mut wanted: BTreeMap<&str, (Vec<InstanceKey>, BTreeSet<String>)> = BTreeMap::new();
        for item in items {
            let Some(key) = item.primary_keys.first() else { continue };
            for field in fields {
                let Some(properties) = field.as_properties() else { continue };
                if !matches!(properties.content, ContentClass::Entity(_)) {
                    continue;
                }
                if let Some(property) = properties.property_for(&key.class) {
                    let entry = wanted.entry(key.class.as_str()).or_default();
                    if !entry.0.contains(key) {
                        entry.0.push(key.clone());
                    }
                    entry.1.insert(property.to_string());
                }
            }
        }

        let mut values = HashMap::new();
        for (class, (keys, properties)) in wanted {
            let properties: Vec<String> = properties.into_iter().collect();
            let fetched = traversal.fetch_properties(&keys, &properties)?;
            if !fetched.failures.is_empty() {
                warn!(class, failed_batches = fetched.failures.len(), "property fetch failed");
            }
            for (index, item) in items.iter().enumerate() {
                let Some(error) = item.primary_keys.first().and_then(|k| fetched.failure(k)) else {
                    continue;
                };
                let error = RecordError::TraversalFailure {
                    field: None,
                    message: failure_message(error.clone()),
                };
                push_error(errors, owners[index], error);
            }
            values.extend(fetched.found);
        }
        Ok(values)
    }

    fn fill_nested(
        &self,
        traversal: &Traversal<'_>,
        items: &mut [NestedItem],
        owners: &[usize],
        field: &Field,
        nested: &NestedContentField,
        errors: &mut [Vec<RecordError>],
    ) -> Result<(), Error> {
        for item in items.iter_mut() {
            item.insert(field.name.clone(), RecordValue::null(), DisplayValue::Null);
        }

        let eligible: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                item.primary_keys
                    .first()
                    .is_some_and(|k| nested.actual_source_types.contains(&k.class))
            })
            .map(|(index, _)| index)
            .collect();
        if eligible.is_empty() {
            return Ok(());
        }

        let mut frontier: Vec<Vec<RelatedInstance>> = eligible
            .iter()
            .map(|&index| {
                items[index]
                    .primary_keys
                    .first()
                    .map(|k| vec![RelatedInstance::new(k.clone(), "")])
                    .unwrap_or_default()
            })
            .collect();
        let mut failed = vec![false; eligible.len()];

        for step in &nested.path {
            let sources: Vec<InstanceKey> = frontier
                .iter()
                .zip(&failed)
                .filter(|(_, failed)| !**failed)
                .flat_map(|(current, _)| current.iter().map(|r| r.key.clone()))
                .collect();
            if sources.is_empty() {
                break;
            }

            let hop = self.hop(traversal, &sources, step)?;
            if !hop.failed.is_empty() {
                warn!(field = %field.name, failed = hop.failed.len(), "related content fetch failed");
            }

            for (slot, current) in frontier.iter_mut().enumerate() {
                if failed[slot] {
                    continue;
                }
                if let Some(error) = current.iter().find_map(|r| hop.failed.get(&r.key)) {
                    failed[slot] = true;
                    push_error(
                        errors,
                        owners[eligible[slot]],
                        RecordError::TraversalFailure {
                            field: Some(field.name.clone()),
                            message: failure_message(error.clone()),
                        },
                    );
                    current.clear();
                    continue;
                }
                for origin in &hop.overflowed {
                    if current.iter().any(|r| &r.key == origin) {
                        push_error(
                            errors,
                            owners[eligible[slot]],
                            RecordError::RecursionOverflow {
                                field: Some(field.name.clone()),
                                origin: origin.clone(),
                                max_hops: self.config.max_recursion_hops,
                            },
                        );
                    }
                }

                let mut seen = HashSet::new();
                let mut next = Vec::new();
                for source in current.iter() {
                    for target in hop.reached.get(&source.key).into_iter().flatten() {
                        if step.target_types.contains(&target.key.class) && seen.insert(target.key.clone()) {
                            next.push(target.clone());
                        }
                    }
                }
                *current = next;
            }
        }

        let mut child_items = Vec::new();
        let mut child_links = Vec::new();
        let mut child_owners = Vec::new();
        let mut spans = Vec::with_capacity(eligible.len());
        for (slot, reached) in frontier.into_iter().enumerate() {
            let start = child_items.len();
            if !failed[slot] {
                for related in reached {
                    child_items.push(NestedItem::new(related.key));
                    child_links.push(related.properties);
                    child_owners.push(owners[eligible[slot]]);
                }
            }
            spans.push(child_items.len() - start);
        }

        self.fill(
            traversal,
            &mut child_items,
            &child_links,
            &child_owners,
            &nested.children,
            errors,
        )?;

        let many = nested.is_many();
        let mut children = child_items.into_iter();
        for (slot, len) in spans.into_iter().enumerate() {
            let group: Vec<NestedItem> = children.by_ref().take(len).collect();
            if failed[slot] {
                continue;
            }
            let value = if many {
                RecordValue::Array(group)
            } else {
                group
                    .into_iter()
                    .next()
                    .map_or_else(RecordValue::null, RecordValue::Struct)
            };
            items[eligible[slot]].insert(field.name.clone(), value, DisplayValue::Null);
        }
        Ok(())
    }
}

/// Outcome of one path step.
struct Hop {
    reached: HashMap<InstanceKey, Vec<RelatedInstance>>,
    /// Origins that hit the hop limit.
    overflowed: Vec<InstanceKey>,
    /// Sources whose provider batch failed.
    failed: HashMap<InstanceKey, Error>,
}

fn push_error(errors: &mut [Vec<RecordError>], owner: usize, error: RecordError) {
    if let Some(list) = errors.get_mut(owner) {
        if !list.contains(&error) {
            list.push(error);
        }
    }
}

fn failure_message(error: Error) -> String {
    match error {
        Error::Provider(message) => message,
        other => other.to_string(),
    }
}
