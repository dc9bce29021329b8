//! Field tree construction.
//!
//! Specifications are inserted into a route trie keyed by concrete hops, so
//! every specification passing through the same reachable type shares one
//! node. Nodes where a specification ends become nested content fields; the
//! hops of pass-through nodes are folded into the path of the next field
//! below them. Property fields are added once the structure is settled, in
//! specification priority order, which is what makes duplicate suppression
//! order-independent of declaration within a priority level.

use super::category::{Category, CategoryTree, DEFAULT_CATEGORY_ID};
use super::field::{
    path_signature, ContentClass, Field, FieldId, FieldKind, FieldStep, NestedContentField,
    PropertiesField, PropertyPair,
};
use super::naming::{canonical_key, unique_name};
use super::{ContentDescriptor, ContentFlags, DescriptorBuild, DescriptorRequest, Diagnostic, RowSource};
use crate::catalog::{PropertyDef, ResolvedProperty, SchemaBundle};
use crate::config::EngineConfig;
use crate::content::{CancellationToken, InstanceProvider, Traversal};
use crate::error::Error;
use crate::resolve::{PathResolver, ResolveOptions, ResolvedStep};
use crate::rules::{
    ContentRuleSet, ContentSelection, PropertyOverride, PropertySelector, RelatedContentSpec,
    RelationshipMeaning, RelationshipPath,
};
use relcontent_proto::{InstanceKey, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, instrument, trace, warn};

/// Builds content descriptors from a rule set.
pub struct DescriptorBuilder<'a> {
    schema: &'a SchemaBundle,
    rules: &'a ContentRuleSet,
    config: &'a EngineConfig,
    provider: Option<&'a dyn InstanceProvider>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> DescriptorBuilder<'a> {
    /// Create a schema-only builder.
    pub fn new(schema: &'a SchemaBundle, rules: &'a ContentRuleSet, config: &'a EngineConfig) -> Self {
        Self {
            schema,
            rules,
            config,
            provider: None,
            cancel: None,
        }
    }

    /// Narrow scoped requests to the types of actually related instances.
    pub fn with_provider(mut self, provider: &'a dyn InstanceProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Stop at the next provider call once `token` is cancelled.
    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Build a descriptor.
    ///
    /// Specifications that cannot be resolved are reported as diagnostics
    /// and left out. Fails only on cancellation or a request without root
    /// types, unless the rule set selects instances of classes.
    #[instrument(skip_all, fields(ruleset = %self.rules.id, roots = request.root_types.len()))]
    pub fn build(&self, request: &DescriptorRequest) -> Result<DescriptorBuild, Error> {
        let by_class = matches!(self.rules.selection, ContentSelection::InstancesOfClasses { .. });
        if request.root_types.is_empty() && !by_class {
            return Err(Error::InvalidData(
                "descriptor request names no root types".into(),
            ));
        }

        let mut resolver = PathResolver::new(self.schema);
        let mut scope = None;
        if let Some(provider) = self.provider {
            let traversal = Traversal::new(provider, self.config.effective_batch_size(), self.cancel);
            resolver = resolver.with_traversal(traversal, self.config.max_recursion_hops);
            scope = request.scope.as_deref();
        }

        let mut tree = FieldTree::new(self.schema, self.rules, self.config);

        let mut roots = Vec::new();
        for ty in &request.root_types {
            match self.schema.entity(ty) {
                Ok(_) => roots.push(ty.clone()),
                Err(e) => tree.diagnose(None, e),
            }
        }

        let (row_types, row_scope, rows) = match &self.rules.selection {
            ContentSelection::SelectedInstances => {
                (roots, scope.map(|keys| keys.to_vec()), RowSource::Requested)
            }
            ContentSelection::RelatedInstances { path } => {
                let selected = self.select_related(&resolver, path, &roots, scope, &mut tree)?;
                (
                    selected.row_types.into_iter().collect(),
                    selected.instances,
                    RowSource::Related {
                        steps: selected.steps,
                    },
                )
            }
            ContentSelection::InstancesOfClasses {
                classes,
                polymorphic,
            } => (self.select_classes(classes, *polymorphic, &mut tree), None, RowSource::Classes),
        };

        if !request.flags.creates_fields() {
            trace!(flags = ?request.flags, "content flags leave the descriptor without fields");
            return Ok(tree.freeze(row_types.into_iter().collect(), rows, request.flags));
        }

        tree.add_direct_properties(&row_types, &request.variables);

        let mut trie = RouteTrie::default();
        for row_type in &row_types {
            let instances: Option<Vec<InstanceKey>> = row_scope.as_ref().map(|keys| {
                keys.iter()
                    .filter(|k| &k.class == row_type)
                    .cloned()
                    .collect()
            });
            for ordered in self.rules.ordered_specs(self.schema, row_type, &request.variables) {
                let placement = Placement {
                    parent: None,
                    source_type: row_type,
                    instances: instances.as_deref(),
                };
                let contribution = Contribution {
                    spec: ordered.spec,
                    priority: ordered.priority,
                    order: ordered.order,
                };
                self.insert_spec(&resolver, &mut trie, placement, contribution, &mut tree)?;
            }
        }

        let top = trie.roots.clone();
        tree.emit(&trie, &top, None, Vec::new(), None);
        tree.add_nested_properties();

        let build = tree.freeze(row_types.into_iter().collect(), rows, request.flags);
        debug!(
            fields = build.descriptor.len(),
            diagnostics = build.diagnostics.len(),
            "descriptor built"
        );
        Ok(build)
    }

    /// Resolve the related-instances selection into row types.
    fn select_related(
        &self,
        resolver: &PathResolver<'_>,
        path: &RelationshipPath,
        roots: &[String],
        scope: Option<&[InstanceKey]>,
        tree: &mut FieldTree<'_>,
    ) -> Result<Selected, Error> {
        let mut selected = Selected {
            row_types: BTreeSet::new(),
            instances: scope.map(|_| Vec::new()),
            steps: Vec::new(),
        };

        for root in roots {
            let resolved = match resolver.resolve(path, root, ResolveOptions::default(), scope) {
                Ok(resolved) => resolved,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tree.diagnose(Some(describe_path(path)), e);
                    continue;
                }
            };
            for route in &resolved.routes {
                if let Some(target) = route.target_type() {
                    selected.row_types.insert(target.to_string());
                }
                if let (Some(acc), Some(keys)) = (selected.instances.as_mut(), &route.instances) {
                    for key in keys {
                        if !acc.contains(key) {
                            acc.push(key.clone());
                        }
                    }
                }
                for (index, step) in route.steps.iter().enumerate() {
                    let step = FieldStep::from(step);
                    match selected.steps.get_mut(index) {
                        Some(existing) => existing.absorb(&step),
                        None => selected.steps.push(step),
                    }
                }
            }
        }

        if selected.row_types.is_empty() {
            trace!("related-instances selection resolved to nothing");
        }
        Ok(selected)
    }

    /// Row types of an instances-of-classes selection. Abstract classes have
    /// no instances of their own; derived hidden types are left out of a
    /// polymorphic expansion, explicitly named ones are kept.
    fn select_classes(&self, classes: &[String], polymorphic: bool, tree: &mut FieldTree<'_>) -> Vec<String> {
        let mut row_types = BTreeSet::new();
        for class in classes {
            let origin = Some(format!("class {}", class));
            if !polymorphic {
                match self.schema.entity(class) {
                    Ok(def) if def.is_abstract => trace!(class = %class, "abstract class selects no rows"),
                    Ok(_) => {
                        row_types.insert(class.clone());
                    }
                    Err(e) => tree.diagnose(origin, e),
                }
                continue;
            }
            match self.schema.resolve_derived_types(class, false) {
                Ok(types) => row_types.extend(
                    types
                        .into_iter()
                        .filter(|ty| ty == class || !self.schema.is_hidden(ty)),
                ),
                Err(e) => tree.diagnose(origin, e),
            }
        }
        row_types.into_iter().collect()
    }

    /// Insert a specification and its nested specifications into the trie.
    fn insert_spec<'r>(
        &self,
        resolver: &PathResolver<'_>,
        trie: &mut RouteTrie<'r>,
        placement: Placement<'_>,
        contribution: Contribution<'r>,
        tree: &mut FieldTree<'r>,
    ) -> Result<(), Error> {
        if self.cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let spec = contribution.spec;
        let options = ResolveOptions {
            final_filter: spec.filter.as_ref(),
            polymorphic: spec.polymorphic,
        };
        let resolved =
            match resolver.resolve(&spec.path, placement.source_type, options, placement.instances) {
                Ok(resolved) => resolved,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tree.diagnose_spec(spec, e);
                    return Ok(());
                }
            };

        if resolved.is_empty() {
            trace!(
                spec = %describe_path(&spec.path),
                source = placement.source_type,
                "no route from source type"
            );
            return Ok(());
        }

        for route in &resolved.routes {
            let mut node = placement.parent;
            for step in &route.steps {
                node = Some(trie.child(node, step));
            }
            let Some(terminal) = node else { continue };
            trie.contribute(terminal, contribution);
            if let Some(keys) = &route.instances {
                trie.add_instances(terminal, keys);
            }

            let Some(target) = route.target_type() else { continue };
            for nested in &spec.nested {
                let nested_contribution = Contribution {
                    spec: nested,
                    priority: nested.priority.unwrap_or(contribution.priority),
                    order: contribution.order,
                };
                let nested_placement = Placement {
                    parent: Some(terminal),
                    source_type: target,
                    instances: route.instances.as_deref(),
                };
                self.insert_spec(resolver, trie, nested_placement, nested_contribution, tree)?;
            }
        }
        Ok(())
    }
}

/// Short human-readable form of a path, for diagnostics.
fn describe_path(path: &RelationshipPath) -> String {
    path.steps()
        .iter()
        .map(|s| format!("{}({})", s.relationship, s.direction))
        .collect::<Vec<_>>()
        .join("/")
}

struct Selected {
    row_types: BTreeSet<String>,
    instances: Option<Vec<InstanceKey>>,
    steps: Vec<FieldStep>,
}

/// Where a specification's routes start.
#[derive(Clone, Copy)]
struct Placement<'p> {
    parent: Option<usize>,
    source_type: &'p str,
    instances: Option<&'p [InstanceKey]>,
}

/// A specification ending at a trie node.
#[derive(Debug, Clone, Copy)]
struct Contribution<'r> {
    spec: &'r RelatedContentSpec,
    priority: i32,
    order: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    signature: String,
    target: String,
}

struct TrieNode<'r> {
    step: FieldStep,
    target: String,
    source_types: BTreeSet<String>,
    instances: Vec<InstanceKey>,
    contributions: Vec<Contribution<'r>>,
    children: Vec<usize>,
    child_index: HashMap<NodeKey, usize>,
}

#[derive(Default)]
struct RouteTrie<'r> {
    nodes: Vec<TrieNode<'r>>,
    roots: Vec<usize>,
    root_index: HashMap<NodeKey, usize>,
}

impl<'r> RouteTrie<'r> {
    /// Node for `step` below `parent`, created when absent.
    fn child(&mut self, parent: Option<usize>, step: &ResolvedStep) -> usize {
        let field_step = FieldStep::from(step);
        let key = NodeKey {
            signature: field_step.signature(),
            target: step.target_type.clone(),
        };
        let existing = match parent {
            Some(p) => self.nodes[p].child_index.get(&key).copied(),
            None => self.root_index.get(&key).copied(),
        };

        let id = match existing {
            Some(id) => {
                self.nodes[id].step.absorb(&field_step);
                id
            }
            None => {
                let id = self.nodes.len();
                self.nodes.push(TrieNode {
                    step: field_step,
                    target: step.target_type.clone(),
                    source_types: BTreeSet::new(),
                    instances: Vec::new(),
                    contributions: Vec::new(),
                    children: Vec::new(),
                    child_index: HashMap::new(),
                });
                match parent {
                    Some(p) => {
                        self.nodes[p].children.push(id);
                        self.nodes[p].child_index.insert(key, id);
                    }
                    None => {
                        self.roots.push(id);
                        self.root_index.insert(key, id);
                    }
                }
                id
            }
        };
        self.nodes[id].source_types.insert(step.source_type.clone());
        id
    }

    fn contribute(&mut self, node: usize, contribution: Contribution<'r>) {
        let contributions = &mut self.nodes[node].contributions;
        if !contributions
            .iter()
            .any(|c| std::ptr::eq(c.spec, contribution.spec))
        {
            contributions.push(contribution);
        }
    }

    fn add_instances(&mut self, node: usize, keys: &[InstanceKey]) {
        let instances = &mut self.nodes[node].instances;
        for key in keys {
            if !instances.contains(key) {
                instances.push(key.clone());
            }
        }
    }
}

/// Display attributes of a property field.
#[derive(Debug, Clone)]
struct FieldAttrs {
    label: String,
    category: String,
    priority: i32,
    renderer: Option<String>,
    editor: Option<String>,
}

impl FieldAttrs {
    fn apply_override(&mut self, o: &PropertyOverride) {
        if let Some(label) = &o.label {
            self.label = label.clone();
        }
        if let Some(priority) = o.priority {
            self.priority = priority;
        }
        if o.renderer.is_some() {
            self.renderer = o.renderer.clone();
        }
        if o.editor.is_some() {
            self.editor = o.editor.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FieldKey {
    parent: Option<FieldId>,
    signature: String,
    content: ContentClass,
    property: Option<String>,
}

struct Draft {
    field: Field,
    key: FieldKey,
    stem: String,
    ordinal: usize,
    /// Priority of the specification that created the field. Unlike the
    /// display priority it is not affected by overrides.
    spec_priority: i32,
}

/// A direct property of the row types, before it becomes a field.
struct PendingDirect {
    declaring_type: String,
    def: PropertyDef,
    pairs: Vec<PropertyPair>,
    attrs: FieldAttrs,
    category_ref: Option<String>,
}

/// Field arena under construction.
struct FieldTree<'s> {
    schema: &'s SchemaBundle,
    rules: &'s ContentRuleSet,
    drafts: Vec<Draft>,
    index: HashMap<FieldKey, Vec<FieldId>>,
    roots: Vec<FieldId>,
    nested_order: Vec<FieldId>,
    contributions: HashMap<FieldId, Vec<(&'s RelatedContentSpec, i32, usize)>>,
    categories: CategoryTree,
    diagnostics: Vec<Diagnostic>,
    reported: Vec<&'s RelatedContentSpec>,
}

impl<'s> FieldTree<'s> {
    fn new(schema: &'s SchemaBundle, rules: &'s ContentRuleSet, config: &EngineConfig) -> Self {
        Self {
            schema,
            rules,
            drafts: Vec::new(),
            index: HashMap::new(),
            roots: Vec::new(),
            nested_order: Vec::new(),
            contributions: HashMap::new(),
            categories: CategoryTree::with_default(config.default_category_label.clone()),
            diagnostics: Vec::new(),
            reported: Vec::new(),
        }
    }

    fn diagnose(&mut self, spec: Option<String>, error: Error) {
        let diagnostic = Diagnostic { spec, error };
        if !self.diagnostics.contains(&diagnostic) {
            self.diagnostics.push(diagnostic);
        }
    }

    /// Report a specification that cannot be resolved. A specification is
    /// reported once, however many row types and parent routes reach it.
    fn diagnose_spec(&mut self, spec: &'s RelatedContentSpec, error: Error) {
        if self.reported.iter().any(|r| std::ptr::eq(*r, spec)) {
            return;
        }
        self.reported.push(spec);
        let description = describe_path(&spec.path);
        warn!(spec = %description, error = %error, "skipping related content specification");
        self.diagnostics.push(Diagnostic {
            spec: Some(description),
            error,
        });
    }

    fn push(&mut self, key: FieldKey, stem: String, mut field: Field, spec_priority: i32) -> FieldId {
        let id = FieldId(self.drafts.len());
        field.id = id;
        field.parent = key.parent;
        let ids = self.index.entry(key.clone()).or_default();
        let ordinal = ids.len();
        ids.push(id);

        match key.parent {
            Some(parent) => {
                if let FieldKind::Nested(nested) = &mut self.drafts[parent.0].field.kind {
                    nested.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        self.drafts.push(Draft {
            field,
            key,
            stem,
            ordinal,
            spec_priority,
        });
        id
    }

    /// Resolve a category reference, registering the category and its
    /// ancestors. Unknown references fall back to `fallback`; they are
    /// reported when `origin` names the referring selector.
    fn resolve_category(&mut self, reference: Option<&str>, fallback: &str, origin: Option<&str>) -> String {
        let Some(id) = reference else {
            return fallback.to_string();
        };
        if self.categories.contains(id) {
            return id.to_string();
        }
        let rules = self.rules;
        let Some(spec) = rules.category(id) else {
            match origin {
                Some(origin) => {
                    self.diagnose(Some(origin.to_string()), Error::UnknownCategory(id.to_string()));
                }
                None => trace!(category = id, "schema category not defined by rule set"),
            }
            return fallback.to_string();
        };

        self.categories.insert(Category {
            id: spec.id.clone(),
            label: spec.label.clone(),
            priority: spec.priority,
            auto_expand: spec.auto_expand,
            parent: Some(DEFAULT_CATEGORY_ID.to_string()),
        });
        if let Some(parent) = spec.parent.as_deref() {
            let parent = self.resolve_category(Some(parent), DEFAULT_CATEGORY_ID, origin);
            if !self.categories.has_ancestor(&parent, id) {
                self.categories.set_parent(id, &parent);
            }
        }
        id.to_string()
    }

    /// Category of a nested field, named after its content type.
    fn nested_category(
        &mut self,
        content_type: &str,
        meaning: RelationshipMeaning,
        parent: Option<FieldId>,
        auto_expand: bool,
    ) -> String {
        let parent_category = match (meaning, parent) {
            (RelationshipMeaning::RelatedInstance, Some(p)) => self.drafts[p.0].field.category.clone(),
            _ => DEFAULT_CATEGORY_ID.to_string(),
        };
        let id = if parent_category == DEFAULT_CATEGORY_ID {
            content_type.to_string()
        } else {
            format!("{}/{}", parent_category, content_type)
        };
        let label = self
            .schema
            .get_entity(content_type)
            .map(|e| e.display_label().to_string())
            .unwrap_or_else(|| content_type.to_string());
        self.categories.insert(Category {
            id: id.clone(),
            label,
            priority: 0,
            auto_expand,
            parent: Some(parent_category),
        });
        id
    }

    /// Add properties fields for the row types' own properties.
    fn add_direct_properties(&mut self, row_types: &[String], variables: &BTreeMap<String, Value>) {
        let mut pending: Vec<PendingDirect> = Vec::new();

        for row_type in row_types {
            let properties = match self.schema.properties(row_type) {
                Ok(properties) => properties,
                Err(e) => {
                    self.diagnose(None, e);
                    continue;
                }
            };
            for property in properties {
                if property.def.hidden {
                    trace!(entity = %row_type, property = %property.def.name, "skipping hidden property");
                    continue;
                }
                direct_entry(&mut pending, &property).pairs.push(PropertyPair {
                    class: row_type.clone(),
                    property: property.def.name.clone(),
                });
            }
        }

        let rules = self.rules;
        for row_type in row_types {
            let mut modifiers: Vec<_> = rules
                .applicable_modifiers(self.schema, row_type, variables)
                .into_iter()
                .map(|(_, m)| m)
                .collect();
            modifiers.sort_by_key(|m| m.priority);

            for modifier in modifiers {
                for o in &modifier.property_overrides {
                    let property = match self.schema.property(row_type, &o.name) {
                        Ok(property) => property,
                        Err(e) => {
                            self.diagnose(Some(format!("modifier {}", modifier.class)), e);
                            continue;
                        }
                    };
                    let pair = PropertyPair {
                        class: row_type.clone(),
                        property: property.def.name.clone(),
                    };
                    let entry = direct_entry(&mut pending, &property);
                    if !o.displayed {
                        entry.pairs.retain(|p| p != &pair);
                        continue;
                    }
                    if !entry.pairs.contains(&pair) {
                        entry.pairs.push(pair);
                    }
                    entry.attrs.apply_override(o);
                    if o.category.is_some() {
                        entry.category_ref = o.category.clone();
                    }
                }
            }
        }

        for direct in pending {
            if direct.pairs.is_empty() {
                continue;
            }
            let origin = direct
                .category_ref
                .as_ref()
                .map(|_| format!("property {}", direct.def.name));
            let category = self.resolve_category(
                direct.category_ref.as_deref(),
                DEFAULT_CATEGORY_ID,
                origin.as_deref(),
            );
            let key = FieldKey {
                parent: None,
                signature: String::new(),
                content: ContentClass::Entity(direct.declaring_type.clone()),
                property: Some(direct.def.name.clone()),
            };
            let field = Field {
                id: FieldId(0),
                name: String::new(),
                label: direct.attrs.label,
                category,
                priority: direct.attrs.priority,
                renderer: direct.attrs.renderer,
                editor: direct.attrs.editor,
                parent: None,
                kind: FieldKind::Properties(PropertiesField {
                    content: ContentClass::Entity(direct.declaring_type),
                    property: direct.def.name.clone(),
                    value_type: direct.def.value_type,
                    pairs: direct.pairs,
                }),
            };
            let priority = field.priority;
            self.push(key, direct.def.name, field, priority);
        }
    }

    /// Turn terminal trie nodes into nested content fields.
    fn emit(
        &mut self,
        trie: &RouteTrie<'s>,
        nodes: &[usize],
        parent: Option<FieldId>,
        prefix: Vec<FieldStep>,
        sources: Option<&BTreeSet<String>>,
    ) {
        for &n in nodes {
            let node = &trie.nodes[n];
            let mut path = prefix.clone();
            path.push(node.step.clone());
            let actual = sources.unwrap_or(&node.source_types);

            if node.contributions.is_empty() {
                self.emit(trie, &node.children, parent, path, Some(actual));
                continue;
            }

            let field = self.nested_field(parent, path, actual, node);
            self.emit(trie, &node.children, Some(field), Vec::new(), None);
        }
    }

    fn nested_field(
        &mut self,
        parent: Option<FieldId>,
        path: Vec<FieldStep>,
        actual_sources: &BTreeSet<String>,
        node: &TrieNode<'s>,
    ) -> FieldId {
        let auto_expand = node.contributions.iter().any(|c| c.spec.auto_expand);
        let merge_related = node.contributions.iter().any(|c| c.spec.merge_related_instances);
        let priority = node
            .contributions
            .iter()
            .map(|c| c.priority)
            .max()
            .unwrap_or_default();
        let key = FieldKey {
            parent,
            signature: path_signature(&path),
            content: ContentClass::Entity(node.target.clone()),
            property: None,
        };

        let existing = self.index.get(&key).and_then(|ids| ids.first()).copied();
        let id = match existing {
            Some(id) => {
                let draft = &mut self.drafts[id.0];
                draft.field.priority = draft.field.priority.max(priority);
                if let FieldKind::Nested(nested) = &mut draft.field.kind {
                    for (mine, theirs) in nested.path.iter_mut().zip(&path) {
                        mine.absorb(theirs);
                    }
                    nested
                        .actual_source_types
                        .extend(actual_sources.iter().cloned());
                    nested.auto_expand |= auto_expand;
                    nested.merge_related_instances |= merge_related;
                }
                trace!(content = %node.target, "merging into existing nested field");
                id
            }
            None => {
                let lead = node
                    .contributions
                    .iter()
                    .min_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)))
                    .map(|c| c.spec.meaning)
                    .unwrap_or_default();
                let category = self.nested_category(&node.target, lead, parent, auto_expand);
                let label = self
                    .schema
                    .get_entity(&node.target)
                    .map(|e| e.display_label().to_string())
                    .unwrap_or_else(|| node.target.clone());
                let field = Field {
                    id: FieldId(0),
                    name: String::new(),
                    label,
                    category,
                    priority,
                    renderer: None,
                    editor: None,
                    parent,
                    kind: FieldKind::Nested(NestedContentField {
                        content_type: node.target.clone(),
                        path,
                        actual_source_types: actual_sources.clone(),
                        children: Vec::new(),
                        auto_expand,
                        meaning: lead,
                        merge_related_instances: merge_related,
                    }),
                };
                let id = self.push(key, node.target.clone(), field, priority);
                self.nested_order.push(id);
                id
            }
        };

        let contributions = self.contributions.entry(id).or_default();
        for c in &node.contributions {
            if !contributions.iter().any(|(spec, _, _)| std::ptr::eq(*spec, c.spec)) {
                contributions.push((c.spec, c.priority, c.order));
            }
        }
        id
    }

    /// Add the selected target and relationship properties to every nested
    /// field, highest-priority specification first.
    fn add_nested_properties(&mut self) {
        for id in self.nested_order.clone() {
            let (content_type, relationship, category) = match &self.drafts[id.0].field.kind {
                FieldKind::Nested(nested) => (
                    nested.content_type.clone(),
                    nested.relationship().map(str::to_string),
                    self.drafts[id.0].field.category.clone(),
                ),
                FieldKind::Properties(_) => continue,
            };
            let mut contributions = self.contributions.get(&id).cloned().unwrap_or_default();
            contributions.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

            for (spec, priority, _) in contributions {
                let origin = describe_path(&spec.path);
                match self.schema.properties(&content_type) {
                    Ok(available) => self.apply_selectors(
                        id,
                        ContentClass::Entity(content_type.clone()),
                        &available,
                        &spec.properties,
                        (spec, priority),
                        &category,
                        &origin,
                    ),
                    Err(e) => self.diagnose(Some(origin.clone()), e),
                }

                let Some(rel) = &relationship else { continue };
                if spec.relationship_properties.is_empty() {
                    continue;
                }
                match self.schema.relationship_properties(rel) {
                    Ok(available) => self.apply_selectors(
                        id,
                        ContentClass::Relationship(rel.clone()),
                        &available,
                        &spec.relationship_properties,
                        (spec, priority),
                        &category,
                        &origin,
                    ),
                    Err(e) => self.diagnose(Some(origin), e),
                }
            }
        }
    }

    fn apply_selectors(
        &mut self,
        parent: FieldId,
        content: ContentClass,
        available: &[ResolvedProperty],
        selectors: &[PropertySelector],
        (spec, priority): (&RelatedContentSpec, i32),
        category: &str,
        origin: &str,
    ) {
        let mut chosen: Vec<(&ResolvedProperty, Option<&PropertyOverride>)> = Vec::new();
        for selector in selectors {
            match selector {
                PropertySelector::All => {
                    for property in available {
                        if property.def.hidden {
                            continue;
                        }
                        if !chosen.iter().any(|(p, _)| p.name() == property.name()) {
                            chosen.push((property, None));
                        }
                    }
                }
                PropertySelector::None => {}
                PropertySelector::Named(o) => {
                    let Some(property) = available.iter().find(|p| p.name() == o.name) else {
                        self.diagnose(
                            Some(origin.to_string()),
                            Error::UnknownProperty {
                                entity: content.name().to_string(),
                                property: o.name.clone(),
                            },
                        );
                        continue;
                    };
                    if !o.displayed {
                        chosen.retain(|(p, _)| p.name() != o.name);
                    } else if let Some(slot) = chosen.iter_mut().find(|(p, _)| p.name() == o.name) {
                        slot.1 = Some(o);
                    } else {
                        chosen.push((property, Some(o)));
                    }
                }
            }
        }

        for (property, o) in chosen {
            let mut attrs = FieldAttrs {
                label: property.def.display_label().to_string(),
                category: String::new(),
                priority,
                renderer: None,
                editor: None,
            };
            let mut category_ref = property.def.category.clone();
            let mut reported = None;
            if let Some(o) = o {
                attrs.apply_override(o);
                if o.category.is_some() {
                    category_ref = o.category.clone();
                    reported = Some(origin);
                }
            }
            attrs.category = self.resolve_category(category_ref.as_deref(), category, reported);

            let skip = spec.skip_if_duplicate || o.is_some_and(|o| o.skip_if_duplicate);
            let pairs = vec![PropertyPair {
                class: content.name().to_string(),
                property: property.def.name.clone(),
            }];
            self.add_property_field(parent, content.clone(), &property.def, pairs, attrs, (priority, skip));
        }
    }

    /// Add a properties field under a nested field, honouring duplicate
    /// suppression.
    fn add_property_field(
        &mut self,
        parent: FieldId,
        content: ContentClass,
        def: &PropertyDef,
        pairs: Vec<PropertyPair>,
        attrs: FieldAttrs,
        (spec_priority, skip_if_duplicate): (i32, bool),
    ) -> Option<FieldId> {
        let key = FieldKey {
            parent: Some(parent),
            signature: String::new(),
            content: content.clone(),
            property: Some(def.name.clone()),
        };

        if skip_if_duplicate {
            let top = self.index.get(&key).and_then(|ids| {
                ids.iter()
                    .copied()
                    .min_by(|a, b| {
                        let pa = self.drafts[a.0].spec_priority;
                        let pb = self.drafts[b.0].spec_priority;
                        pb.cmp(&pa).then(a.cmp(b))
                    })
            });
            if let Some(top) = top {
                let existing = &mut self.drafts[top.0];
                if existing.spec_priority > spec_priority {
                    trace!(property = %def.name, "duplicate suppressed by higher priority field");
                    return None;
                }
                if existing.spec_priority == spec_priority {
                    trace!(property = %def.name, "duplicate at equal priority, adopting later attributes");
                    let field = &mut existing.field;
                    field.label = attrs.label;
                    field.category = attrs.category;
                    field.priority = attrs.priority;
                    field.renderer = attrs.renderer;
                    field.editor = attrs.editor;
                    return Some(top);
                }
            }
        }

        let stem = match &content {
            ContentClass::Entity(_) => def.name.clone(),
            ContentClass::Relationship(rel) => format!("{}_{}", rel, def.name),
        };
        let field = Field {
            id: FieldId(0),
            name: String::new(),
            label: attrs.label,
            category: attrs.category,
            priority: attrs.priority,
            renderer: attrs.renderer,
            editor: attrs.editor,
            parent: Some(parent),
            kind: FieldKind::Properties(PropertiesField {
                content,
                property: def.name.clone(),
                value_type: def.value_type,
                pairs,
            }),
        };
        Some(self.push(key, stem, field, spec_priority))
    }

    /// Fields in display order: priority descending, then creation order.
    fn sorted(&self, ids: &[FieldId]) -> Vec<FieldId> {
        let mut ids = ids.to_vec();
        ids.sort_by(|a, b| {
            let pa = self.drafts[a.0].field.priority;
            let pb = self.drafts[b.0].field.priority;
            pb.cmp(&pa).then(a.cmp(b))
        });
        ids
    }

    /// Whether a field has any properties field below it.
    fn survives(&self, id: FieldId) -> bool {
        match &self.drafts[id.0].field.kind {
            FieldKind::Properties(_) => true,
            FieldKind::Nested(nested) => nested.children.iter().any(|&c| self.survives(c)),
        }
    }

    /// Copy a surviving field and its subtree into the final arena.
    fn compact(
        &self,
        id: FieldId,
        parent: Option<(FieldId, &str)>,
        out: &mut Vec<Field>,
    ) -> Option<FieldId> {
        if !self.survives(id) {
            trace!(field = %self.drafts[id.0].field.label, "pruning empty nested field");
            return None;
        }
        let draft = &self.drafts[id.0];
        let new_id = FieldId(out.len());
        let key = canonical_key(
            parent.map(|(_, name)| name),
            &draft.key.signature,
            &draft.key.content.to_string(),
            draft.key.property.as_deref(),
        );
        let name = unique_name(&draft.stem, &key, draft.ordinal);

        let mut field = draft.field.clone();
        field.id = new_id;
        field.parent = parent.map(|(p, _)| p);
        field.name = name.clone();
        if let FieldKind::Nested(nested) = &mut field.kind {
            nested.children.clear();
        }
        out.push(field);

        let children = self.sorted(draft.field.children());
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            if let Some(child_id) = self.compact(child, Some((new_id, name.as_str())), out) {
                kept.push(child_id);
            }
        }
        if let FieldKind::Nested(nested) = &mut out[new_id.0].kind {
            nested.children = kept;
        }
        Some(new_id)
    }

    fn freeze(mut self, row_types: BTreeSet<String>, rows: RowSource, flags: ContentFlags) -> DescriptorBuild {
        let mut fields = Vec::new();
        let mut roots = Vec::new();
        for id in self.sorted(&self.roots) {
            if let Some(new_id) = self.compact(id, None, &mut fields) {
                roots.push(new_id);
            }
        }

        self.categories
            .retain_used(fields.iter().map(|f: &Field| f.category.as_str()));

        DescriptorBuild {
            descriptor: ContentDescriptor::new(
                self.rules.id.clone(),
                row_types,
                rows,
                flags,
                fields,
                roots,
                self.categories,
            ),
            diagnostics: self.diagnostics,
        }
    }
}

fn direct_entry<'p>(pending: &'p mut Vec<PendingDirect>, property: &ResolvedProperty) -> &'p mut PendingDirect {
    let position = pending
        .iter()
        .position(|p| p.declaring_type == property.declaring_type && p.def.name == property.def.name);
    let index = match position {
        Some(index) => index,
        None => {
            pending.push(PendingDirect {
                declaring_type: property.declaring_type.clone(),
                def: property.def.clone(),
                pairs: Vec::new(),
                attrs: FieldAttrs {
                    label: property.def.display_label().to_string(),
                    category: String::new(),
                    priority: property.def.priority,
                    renderer: None,
                    editor: None,
                },
                category_ref: property.def.category.clone(),
            });
            pending.len() - 1
        }
    };
    &mut pending[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EndpointDef, EntityTypeDef, Multiplicity, RelationshipTypeDef, ScalarType};
    use crate::rules::{ContentModifier, RelationshipStep, RuleCondition};

    fn schema() -> SchemaBundle {
        SchemaBundle::new(1)
            .with_entity(EntityTypeDef::new("Element").with_property(PropertyDef::new("CodeValue", ScalarType::String)))
            .with_entity(EntityTypeDef::new("SubA").with_base("Element"))
            .with_entity(EntityTypeDef::new("SubB").with_base("Element"))
            .with_entity(
                EntityTypeDef::new("Aspect")
                    .abstract_type()
                    .with_property(PropertyDef::new("Prop", ScalarType::Int64)),
            )
            .with_entity(EntityTypeDef::new("Aspect1").with_base("Aspect"))
            .with_entity(EntityTypeDef::new("Aspect2").with_base("Aspect"))
            .with_entity(EntityTypeDef::new("HiddenAspect").with_base("Aspect").hidden())
            .with_entity(EntityTypeDef::new("Note").with_property(PropertyDef::new("Text", ScalarType::String)))
            .with_relationship(RelationshipTypeDef::new(
                "ElementOwnsAspects",
                EndpointDef::new("Element", Multiplicity::ExactlyOne),
                EndpointDef::new("Aspect", Multiplicity::ZeroOrMany),
            ))
            .with_relationship(RelationshipTypeDef::new(
                "AspectHasNotes",
                EndpointDef::new("Aspect", Multiplicity::ExactlyOne),
                EndpointDef::new("Note", Multiplicity::ZeroOrMany),
            ))
    }

    fn build_for(rules: &ContentRuleSet, request: &DescriptorRequest) -> DescriptorBuild {
        let schema = schema();
        let config = EngineConfig::default();
        DescriptorBuilder::new(&schema, rules, &config).build(request).unwrap()
    }

    fn to_aspect1() -> RelatedContentSpec {
        RelatedContentSpec::new(RelationshipStep::forward("ElementOwnsAspects").to_types(["Aspect1"]))
    }

    fn notes() -> RelatedContentSpec {
        RelatedContentSpec::new(RelationshipStep::forward("AspectHasNotes"))
    }

    fn element_rules(specs: Vec<RelatedContentSpec>) -> ContentRuleSet {
        let modifier = specs
            .into_iter()
            .fold(ContentModifier::new("Element"), ContentModifier::with_related);
        ContentRuleSet::new("rules").with_modifier(modifier)
    }

    fn nested<'d>(descriptor: &'d ContentDescriptor, content_type: &str) -> &'d Field {
        descriptor
            .fields()
            .iter()
            .find(|f| f.as_nested().is_some_and(|n| n.content_type == content_type))
            .unwrap()
    }

    fn nested_types(descriptor: &ContentDescriptor) -> Vec<&str> {
        descriptor
            .fields()
            .iter()
            .filter_map(|f| f.as_nested())
            .map(|n| n.content_type.as_str())
            .collect()
    }

    fn child_labels<'d>(descriptor: &'d ContentDescriptor, parent: &Field) -> Vec<&'d str> {
        parent
            .children()
            .iter()
            .filter_map(|&id| descriptor.field(id))
            .filter(|f| f.as_properties().is_some())
            .map(|f| f.label.as_str())
            .collect()
    }

    #[test]
    fn test_skip_compares_specification_priority() {
        let spec = |o: PropertyOverride| {
            to_aspect1().with_properties(vec![PropertySelector::Named(o.skip_if_duplicate())])
        };
        let rules = ContentRuleSet::new("rules")
            .with_modifier(
                ContentModifier::new("Element")
                    .with_priority(2000)
                    .with_related(spec(PropertyOverride::new("Prop").with_label("High").with_priority(10))),
            )
            .with_modifier(
                ContentModifier::new("Element")
                    .with_priority(1000)
                    .with_related(spec(PropertyOverride::new("Prop").with_label("Low"))),
            );

        let build = build_for(&rules, &DescriptorRequest::new(["Element"]));
        assert!(build.is_clean());
        let aspect = nested(&build.descriptor, "Aspect1");
        assert_eq!(child_labels(&build.descriptor, aspect), vec!["High"]);
        let high = build.descriptor.fields().iter().find(|f| f.label == "High").unwrap();
        assert_eq!(high.priority, 10);
    }

    #[test]
    fn test_equal_priority_last_writer_wins() {
        let spec = |label: &str| {
            to_aspect1().skip_if_duplicate().with_properties(vec![PropertySelector::Named(
                PropertyOverride::new("Prop").with_label(label).with_renderer(label.to_lowercase()),
            )])
        };
        let rules = ContentRuleSet::new("rules")
            .with_modifier(ContentModifier::new("Element").with_priority(5).with_related(spec("First")))
            .with_modifier(ContentModifier::new("Element").with_priority(5).with_related(spec("Second")));

        let build = build_for(&rules, &DescriptorRequest::new(["Element"]));
        let aspect = nested(&build.descriptor, "Aspect1");
        assert_eq!(child_labels(&build.descriptor, aspect), vec!["Second"]);
        let field = build.descriptor.fields().iter().find(|f| f.label == "Second").unwrap();
        assert_eq!(field.renderer.as_deref(), Some("second"));
    }

    #[test]
    fn test_unresolvable_spec_reported_once() {
        let broken = RelatedContentSpec::new(RelationshipStep::forward("NoSuchRel"));

        let rules = element_rules(vec![broken.clone()]);
        let build = build_for(&rules, &DescriptorRequest::new(["SubA", "SubB"]));
        assert_eq!(build.diagnostics.len(), 1);
        assert_eq!(build.diagnostics[0].error, Error::UnknownRelationship("NoSuchRel".into()));
        assert!(build.diagnostics[0].spec.as_deref().is_some_and(|s| s.starts_with("NoSuchRel")));

        // reached below two parent routes, one per aspect subtype
        let rules = element_rules(vec![RelatedContentSpec::new(RelationshipStep::forward("ElementOwnsAspects"))
            .polymorphic()
            .with_nested(broken)]);
        let build = build_for(&rules, &DescriptorRequest::new(["Element"]));
        assert_eq!(nested_types(&build.descriptor), vec!["Aspect1", "Aspect2"]);
        assert_eq!(build.diagnostics.len(), 1);
        assert!(build.diagnostics[0].error.is_schema_inconsistency());
    }

    #[test]
    fn test_nested_spec_under_its_parent_target() {
        let rules = element_rules(vec![to_aspect1().with_nested(notes())]);
        let build = build_for(&rules, &DescriptorRequest::new(["Element"]));
        assert!(build.is_clean());

        let descriptor = &build.descriptor;
        let aspect = nested(descriptor, "Aspect1");
        let note = nested(descriptor, "Note");
        assert_eq!(note.parent, Some(aspect.id));
        assert_eq!(note.as_nested().map(|n| n.path.len()), Some(1));
        let sources = note.as_nested().map(|n| n.actual_source_types.clone()).unwrap_or_default();
        assert_eq!(sources.into_iter().collect::<Vec<_>>(), vec!["Aspect1".to_string()]);
        assert_eq!(child_labels(descriptor, note), vec!["Text"]);
        assert_eq!(child_labels(descriptor, aspect), vec!["Prop"]);
    }

    #[test]
    fn test_shared_prefix_nests_into_intermediate_field() {
        let through = RelatedContentSpec::new(
            RelationshipPath::single(RelationshipStep::forward("ElementOwnsAspects").to_types(["Aspect1"]))
                .then(RelationshipStep::forward("AspectHasNotes")),
        );

        let rules = element_rules(vec![to_aspect1(), through.clone()]);
        let build = build_for(&rules, &DescriptorRequest::new(["Element"]));
        let aspect = nested(&build.descriptor, "Aspect1");
        let note = nested(&build.descriptor, "Note");
        assert_eq!(note.parent, Some(aspect.id));
        assert_eq!(note.as_nested().map(|n| n.path.len()), Some(1));

        // without a field at the intermediate hop the path is folded
        let rules = element_rules(vec![through]);
        let build = build_for(&rules, &DescriptorRequest::new(["Element"]));
        assert_eq!(nested_types(&build.descriptor), vec!["Note"]);
        let note = nested(&build.descriptor, "Note");
        assert_eq!(note.parent, None);
        assert_eq!(note.as_nested().map(|n| n.path.len()), Some(2));
    }

    #[test]
    fn test_empty_nested_fields_are_pruned() {
        let bare = to_aspect1().with_properties(vec![PropertySelector::None]);

        let build = build_for(&element_rules(vec![bare.clone()]), &DescriptorRequest::new(["Element"]));
        assert!(nested_types(&build.descriptor).is_empty());
        assert_eq!(build.descriptor.len(), 1);
        assert!(build.descriptor.categories().get("Aspect1").is_none());

        let build = build_for(&element_rules(vec![bare.with_nested(notes())]), &DescriptorRequest::new(["Element"]));
        let aspect = nested(&build.descriptor, "Aspect1");
        assert!(child_labels(&build.descriptor, aspect).is_empty());
        assert_eq!(aspect.children().len(), 1);
    }

    #[test]
    fn test_named_hidden_type_is_kept() {
        let wildcard = RelatedContentSpec::new(RelationshipStep::forward("ElementOwnsAspects")).polymorphic();
        let build = build_for(&element_rules(vec![wildcard]), &DescriptorRequest::new(["Element"]));
        assert_eq!(nested_types(&build.descriptor), vec!["Aspect1", "Aspect2"]);

        let named = RelatedContentSpec::new(RelationshipStep::forward("ElementOwnsAspects").to_types(["HiddenAspect"]));
        let build = build_for(&element_rules(vec![named]), &DescriptorRequest::new(["Element"]));
        assert_eq!(nested_types(&build.descriptor), vec!["HiddenAspect"]);
    }

    #[test]
    fn test_variable_gated_modifier() {
        let rules = ContentRuleSet::new("rules").with_modifier(
            ContentModifier::new("Element")
                .with_condition(RuleCondition::new("detail", true))
                .with_related(to_aspect1())
                .with_property_override(PropertyOverride::new("CodeValue").with_label("Code")),
        );

        let plain = build_for(&rules, &DescriptorRequest::new(["Element"]));
        assert!(nested_types(&plain.descriptor).is_empty());
        assert_eq!(plain.descriptor.fields()[0].label, "CodeValue");

        let detailed = build_for(&rules, &DescriptorRequest::new(["Element"]).with_variable("detail", true));
        assert_eq!(nested_types(&detailed.descriptor), vec!["Aspect1"]);
        assert!(detailed.descriptor.fields().iter().any(|f| f.label == "Code"));

        let other = build_for(&rules, &DescriptorRequest::new(["Element"]).with_variable("detail", false));
        assert!(nested_types(&other.descriptor).is_empty());
    }

    #[test]
    fn test_category_follows_relationship_meaning() {
        let related = to_aspect1().with_nested(notes().with_meaning(RelationshipMeaning::RelatedInstance));
        let build = build_for(&element_rules(vec![related]), &DescriptorRequest::new(["Element"]));
        let categories = build.descriptor.categories();
        assert_eq!(nested(&build.descriptor, "Aspect1").category, "Aspect1");
        assert_eq!(nested(&build.descriptor, "Note").category, "Aspect1/Note");
        assert_eq!(categories.get("Aspect1/Note").and_then(|c| c.parent.as_deref()), Some("Aspect1"));
        assert_eq!(categories.get("Aspect1").and_then(|c| c.parent.as_deref()), Some(DEFAULT_CATEGORY_ID));

        let same = to_aspect1().with_nested(notes().with_meaning(RelationshipMeaning::SameInstance));
        let build = build_for(&element_rules(vec![same]), &DescriptorRequest::new(["Element"]));
        let note = nested(&build.descriptor, "Note");
        assert_eq!(note.category, "Note");
        assert_eq!(
            build.descriptor.categories().get("Note").and_then(|c| c.parent.as_deref()),
            Some(DEFAULT_CATEGORY_ID)
        );
    }

    #[test]
    fn test_flags_leave_descriptor_without_fields() {
        let rules = element_rules(vec![to_aspect1()]);
        for flags in [ContentFlags::KEYS_ONLY, ContentFlags::NO_FIELDS] {
            let build = build_for(&rules, &DescriptorRequest::new(["Element"]).with_flags(flags));
            assert!(build.is_clean());
            assert!(build.descriptor.is_empty());
            assert!(build.descriptor.roots().is_empty());
            assert_eq!(build.descriptor.flags(), flags);
            assert!(build.descriptor.row_types().contains("Element"));
        }
    }

    #[test]
    fn test_instances_of_classes_row_types() {
        let polymorphic = ContentRuleSet::new("rules").with_selection(ContentSelection::InstancesOfClasses {
            classes: vec!["Aspect".into()],
            polymorphic: true,
        });
        let build = build_for(&polymorphic, &DescriptorRequest::default());
        assert!(build.is_clean());
        assert_eq!(build.descriptor.row_source(), &RowSource::Classes);
        assert_eq!(
            build.descriptor.row_types().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["Aspect1", "Aspect2"]
        );

        let exact = ContentRuleSet::new("rules").with_selection(ContentSelection::InstancesOfClasses {
            classes: vec!["Aspect".into(), "HiddenAspect".into(), "Missing".into()],
            polymorphic: false,
        });
        let build = build_for(&exact, &DescriptorRequest::default());
        assert_eq!(
            build.descriptor.row_types().iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["HiddenAspect"]
        );
        assert_eq!(build.diagnostics.len(), 1);
        assert_eq!(build.diagnostics[0].error, Error::UnknownEntityType("Missing".into()));
        assert!(build.descriptor.fields().iter().any(|f| f.label == "Prop"));
    }

    #[test]
    fn test_requires_root_types_for_requested_rows() {
        let schema = schema();
        let rules = ContentRuleSet::new("rules");
        let config = EngineConfig::default();
        let result = DescriptorBuilder::new(&schema, &rules, &config).build(&DescriptorRequest::default());
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }
}
