//! The compiled, arena-backed schema of one object (or one object type).
//!
//! Compilation turns a declarative property list into nodes, then runs a
//! single initialization pass that wires parents and computes every derived
//! path, followed by dependency resolution and write-order sorting.

use crate::access::{AccessLevel, AccessSpec};
use crate::config::SchemaConfig;
use crate::error::{ResourceType, SchemaError};
use crate::index::slots::IndexSlot;
use crate::schema::definition::{
    ObjectTypeDef, PropertyDef, SetShapeDef, TypeDef, validate_properties,
};
use crate::schema::hooks::NodeHooks;
use crate::schema::kind::{PrimitiveType, PropertyKind, SetSpec};
use crate::schema::node::{Node, NodeId};
use crate::schema::ordered::sort_children;
use crate::schema::walk::WalkControl;
use crate::value::{as_integer, is_id};
use serde_json::{Map, Value, json};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

/// The history storage path every history-enabled node depends on.
pub const HISTORY_PATH: &str = "hist";

/// Facet every file value must carry.
pub const CONTENT_FACET: &str = "content";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootKind {
    Object,
    ObjectType { name: String },
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub kind: RootKind,
    /// Top-level property limit; `None` for internal trees.
    pub max_properties: Option<usize>,
    pub max_depth: Option<usize>,
    pub default_max_items: i64,
    pub slots: Vec<IndexSlot>,
    /// Top-level names of the untyped object, used to tell type-only
    /// properties apart in a typed tree.
    pub master_names: BTreeSet<String>,
}

impl CompileOptions {
    pub fn from_config(config: &SchemaConfig) -> Self {
        Self {
            kind: RootKind::Object,
            max_properties: Some(config.max_properties),
            max_depth: Some(config.max_definition_depth),
            default_max_items: config.default_max_items,
            slots: Vec::new(),
            master_names: BTreeSet::new(),
        }
    }

    /// Options for trees built by the crate itself, without definition limits.
    pub fn internal() -> Self {
        Self {
            kind: RootKind::Object,
            max_properties: None,
            max_depth: None,
            default_max_items: SchemaConfig::default().default_max_items,
            slots: Vec::new(),
            master_names: BTreeSet::new(),
        }
    }

    pub fn with_slots(mut self, slots: Vec<IndexSlot>) -> Self {
        self.slots = slots;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SchemaTree {
    nodes: Vec<Node>,
    root: NodeId,
    object_name: String,
    kind: RootKind,
    master_names: BTreeSet<String>,
    slots: Vec<IndexSlot>,
    history_node_ids: Vec<String>,
}

impl SchemaTree {
    pub fn compile(
        object_name: impl Into<String>,
        properties: Vec<PropertyDef>,
        options: CompileOptions,
    ) -> Result<Self, SchemaError> {
        validate_properties(&properties)?;
        if let Some(max) = options.max_properties {
            if properties.len() > max {
                return Err(SchemaError::Validation {
                    path: "properties".into(),
                    rule: "maxItems".into(),
                    message: format!("An object can have at most {max} properties."),
                });
            }
        }
        if let Some(max_depth) = options.max_depth {
            if let Some(def) = properties.iter().find(|p| definition_depth(p) > max_depth) {
                return Err(SchemaError::Validation {
                    path: def.name.clone(),
                    rule: "maxDepth".into(),
                    message: format!("Properties cannot be nested more than {max_depth} levels."),
                });
            }
        }

        let object_name = object_name.into();
        let mut tree = SchemaTree {
            nodes: Vec::new(),
            root: NodeId(0),
            object_name: object_name.clone(),
            kind: options.kind,
            master_names: options.master_names,
            slots: options.slots,
            history_node_ids: Vec::new(),
        };
        let mut root = blank(NodeId(0), &object_name, PropertyKind::Document);
        root.read_access = AccessSpec::Level(AccessLevel::Read);
        root.write_access = AccessSpec::Level(AccessLevel::Update);
        tree.nodes.push(root);

        if !properties.iter().any(|p| p.name == "_id") {
            tree.add_id_node(tree.root, true);
        }
        for def in properties {
            tree.add_def(tree.root, def, options.default_max_items);
        }

        tree.init_node(tree.root);
        tree.resolve_dependencies();
        for index in 0..tree.nodes.len() {
            let id = NodeId(index as u32);
            if tree.nodes[index].is_document() && !tree.nodes[index].is_set() {
                let sorted = sort_children(&tree, id)?;
                tree.nodes[index].sorted_children = sorted;
            }
        }
        Ok(tree)
    }

    /// Compiles the typed variant of an object: its own properties followed
    /// by the type's. Both share the object's slots.
    pub fn compile_typed(
        object_name: impl Into<String>,
        base: Vec<PropertyDef>,
        object_type: &ObjectTypeDef,
        options: CompileOptions,
        max_type_properties: usize,
    ) -> Result<Self, SchemaError> {
        if object_type.properties.len() > max_type_properties {
            return Err(SchemaError::Validation {
                path: object_type.name.clone(),
                rule: "maxItems".into(),
                message: format!("A type can have at most {max_type_properties} properties."),
            });
        }
        let master_names = base.iter().map(|p| p.name.clone()).collect();
        let mut properties = base;
        for def in &object_type.properties {
            if properties.iter().any(|p| p.name == def.name) {
                return Err(SchemaError::conflict(
                    def.name.clone(),
                    format!("type '{}' redefines '{}'", object_type.name, def.name),
                ));
            }
            properties.push(def.clone());
        }
        let options = CompileOptions {
            kind: RootKind::ObjectType {
                name: object_type.name.clone(),
            },
            master_names,
            max_properties: options.max_properties.map(|m| m + max_type_properties),
            ..options
        };
        Self::compile(object_name, properties, options)
    }

    fn push(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        node.id = id;
        self.nodes.push(node);
        id
    }

    fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.index()].children.push(child);
    }

    fn add_id_node(&mut self, parent: NodeId, auto: bool) -> NodeId {
        let mut node = blank(NodeId(0), "_id", PropertyKind::Primitive(PrimitiveType::ObjectId));
        node.auto = auto;
        node.writable = false;
        node.force_id = true;
        let id = self.push(node);
        self.attach(parent, id);
        id
    }

    fn add_def(&mut self, parent: NodeId, def: PropertyDef, default_max_items: i64) -> NodeId {
        let PropertyDef {
            id: property_id,
            name,
            label,
            kind,
            array,
            readable,
            writable,
            creatable,
            removable,
            optional,
            public,
            is_virtual,
            auto,
            read_access,
            write_access,
            update_access,
            acl,
            acl_override,
            indexed,
            unique,
            history,
            auditable,
            validators,
            dependencies,
            include,
            default_value,
            write_priority,
            defer_writes,
            unique_values,
            min_items,
            max_items,
            max_shift,
            can_push,
            can_pull,
            write_on_create,
            index_slot,
            hooks,
        } = def;

        let mut node = blank(NodeId(0), &name, PropertyKind::Document);
        node.property_id = property_id;
        node.label = label;
        node.array = array;
        node.readable = readable;
        node.writable = writable;
        node.creatable = creatable;
        node.removable = removable;
        node.optional = optional;
        node.public = public;
        node.is_virtual = is_virtual;
        node.auto = auto;
        node.read_access = read_access;
        node.write_access = write_access;
        node.update_access = update_access;
        node.acl = acl;
        node.acl_override = acl_override;
        node.indexed = indexed;
        node.unique = unique;
        node.history = history;
        node.auditable = auditable.unwrap_or(false);
        node.validators = validators;
        node.declared_dependencies = dependencies;
        node.include = include;
        node.default_value = default_value;
        node.write_priority = write_priority;
        node.defer_writes = defer_writes;
        node.unique_values = unique_values;
        node.min_items = min_items;
        node.max_items = max_items.unwrap_or(if array { default_max_items } else { -1 });
        node.max_shift = max_shift;
        node.can_push = can_push;
        node.can_pull = can_pull;
        node.write_on_create = write_on_create;
        node.index_slot = index_slot;
        node.hooks = hooks;

        match kind {
            TypeDef::Document(doc) => {
                node.kind = PropertyKind::Document;
                node.unique_key = doc.unique_key;
                node.merge_overwrite = doc.merge_overwrite;
                node.force_id = doc.force_id;
                let force_id = array || doc.force_id;
                let id = self.push(node);
                self.attach(parent, id);
                if force_id && !doc.properties.iter().any(|p| p.name == "_id") {
                    self.add_id_node(id, true);
                }
                for child in doc.properties {
                    self.add_def(id, child, default_max_items);
                }
                id
            }
            TypeDef::Set(set) => {
                let discriminator_key = set.discriminator_key.unwrap_or_else(|| "name".into());
                let limits = set
                    .documents
                    .iter()
                    .map(|shape| (shape.name.clone(), (shape.min_required, shape.max_allowed)))
                    .collect();
                node.kind = PropertyKind::Set(SetSpec {
                    discriminator_key: discriminator_key.clone(),
                    unique_prop: set.unique_prop,
                    limits,
                });
                node.unique_key = set.unique_key;
                let id = self.push(node);
                self.attach(parent, id);
                for shape in set.documents {
                    self.add_shape(id, shape, &discriminator_key, default_max_items);
                }
                id
            }
            TypeDef::Reference(reference) => {
                let mut id_child =
                    blank(NodeId(0), "_id", PropertyKind::Primitive(PrimitiveType::ObjectId));
                id_child.writable = node.writable;
                id_child.creatable = node.creatable;
                id_child.indexed = node.indexed;
                id_child.unique = node.unique;
                id_child.force_id = true;
                let mut object_child =
                    blank(NodeId(0), "object", PropertyKind::Primitive(PrimitiveType::String));
                object_child.writable = false;
                let mut path_child =
                    blank(NodeId(0), "path", PropertyKind::Primitive(PrimitiveType::String));
                path_child.writable = false;
                path_child.is_virtual = true;
                path_child.hooks = NodeHooks::default().reader(|_, _, parent| {
                    Ok(match (parent.get("object"), parent.get("_id")) {
                        (Some(Value::String(object)), Some(Value::String(id))) => {
                            Some(Value::String(format!("/{object}/{id}")))
                        }
                        _ => None,
                    })
                });

                node.kind = PropertyKind::Reference(Box::new(reference));
                let id = self.push(node);
                self.attach(parent, id);
                for child in [id_child, object_child, path_child] {
                    let child = self.push(child);
                    self.attach(id, child);
                }
                id
            }
            TypeDef::Geometry(geometry) => {
                node.kind = PropertyKind::Geometry(geometry.geo_type);
                let id = self.push(node);
                self.attach(parent, id);
                let mut geo_type =
                    blank(NodeId(0), "type", PropertyKind::Primitive(PrimitiveType::String));
                geo_type.writable = false;
                geo_type.creatable = true;
                let mut coordinates =
                    blank(NodeId(0), "coordinates", PropertyKind::Primitive(PrimitiveType::Any));
                coordinates.array = true;
                coordinates.max_items = -1;
                for child in [geo_type, coordinates] {
                    let child = self.push(child);
                    self.attach(id, child);
                }
                id
            }
            TypeDef::File(file) => {
                let mut facets: Vec<(String, bool)> = vec![(CONTENT_FACET.to_string(), false)];
                facets.extend(
                    file.facets
                        .iter()
                        .filter(|f| f.name != CONTENT_FACET)
                        .map(|f| (f.name.clone(), f.private)),
                );
                node.kind = PropertyKind::File(file);
                let id = self.push(node);
                self.attach(parent, id);
                for (facet, private) in facets {
                    let mut facet_node = blank(NodeId(0), &facet, PropertyKind::Document);
                    facet_node.writable = false;
                    facet_node.readable = !private;
                    let facet_id = self.push(facet_node);
                    self.attach(id, facet_id);
                    for (field, primitive) in [
                        ("name", PrimitiveType::String),
                        ("mime", PrimitiveType::String),
                        ("size", PrimitiveType::Number),
                        ("state", PrimitiveType::Number),
                        ("private", PrimitiveType::Boolean),
                        ("location", PrimitiveType::Any),
                    ] {
                        let mut leaf = blank(NodeId(0), field, PropertyKind::Primitive(primitive));
                        leaf.writable = false;
                        let leaf = self.push(leaf);
                        self.attach(facet_id, leaf);
                    }
                }
                id
            }
            primitive => {
                node.kind = PropertyKind::Primitive(
                    primitive.primitive().unwrap_or(PrimitiveType::Any),
                );
                let id = self.push(node);
                self.attach(parent, id);
                id
            }
        }
    }

    fn add_shape(
        &mut self,
        set: NodeId,
        shape: SetShapeDef,
        discriminator_key: &str,
        default_max_items: i64,
    ) -> NodeId {
        let mut node = blank(NodeId(0), &shape.name, PropertyKind::Document);
        node.property_id = shape.id;
        node.label = shape.label;
        node.is_set_document = true;
        node.force_id = true;
        let id = self.push(node);
        self.attach(set, id);
        if !shape.properties.iter().any(|p| p.name == "_id") {
            self.add_id_node(id, true);
        }
        if !shape.properties.iter().any(|p| p.name == discriminator_key) {
            let mut discriminator = blank(
                NodeId(0),
                discriminator_key,
                PropertyKind::Primitive(PrimitiveType::String),
            );
            discriminator.writable = false;
            discriminator.creatable = true;
            discriminator.write_priority = i32::MAX;
            let child = self.push(discriminator);
            self.attach(id, child);
        }
        for def in shape.properties {
            self.add_def(id, def, default_max_items);
        }
        id
    }

    /// Initializes a node and, recursively, its children. Returns false when
    /// the node was already initialized, in which case nothing changes.
    pub fn init_node(&mut self, id: NodeId) -> bool {
        if self.nodes[id.index()].initialized {
            return false;
        }
        let parent = if id == self.root {
            None
        } else {
            match self.parent_of(id) {
                Some(parent) => Some(parent),
                None => return false,
            }
        };
        self.init_with_parent(parent, id)
    }

    fn init_with_parent(&mut self, parent: Option<NodeId>, id: NodeId) -> bool {
        if self.nodes[id.index()].initialized {
            return false;
        }
        match parent {
            None => {
                let fqpp = self.object_name.clone();
                let root = &mut self.nodes[id.index()];
                root.fqpp = fqpp.clone();
                root.fqpparts = [fqpp, String::new()];
                root.initialized = true;
            }
            Some(parent) => self.init_child(parent, id),
        }
        let children: SmallVec<[NodeId; 8]> = self.nodes[id.index()].children.clone();
        for child in children {
            self.init_with_parent(Some(id), child);
        }
        true
    }

    fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.children.contains(&id))
            .map(|n| n.id)
    }

    fn init_child(&mut self, parent_id: NodeId, id: NodeId) {
        let parent = &self.nodes[parent_id.index()];
        let node = &self.nodes[id.index()];
        let is_set_property = parent.is_set_document;
        let initializing_set_doc = node.is_set_document;
        let path_parent_id = if is_set_property {
            parent.parent
        } else {
            Some(parent_id)
        };
        let path_parent = path_parent_id.map(|pp| &self.nodes[pp.index()]);

        let path = if initializing_set_doc {
            parent.path.clone()
        } else {
            node.name.clone()
        };

        let docpath = match path_parent {
            None => path.clone(),
            Some(pp) if pp.array || pp.docpath.is_empty() => path.clone(),
            Some(pp) if initializing_set_doc => pp.docpath.clone(),
            Some(pp) => format!("{}.{}", pp.docpath, path),
        };

        let fullpath = match path_parent {
            Some(pp) if initializing_set_doc => pp.fullpath.clone(),
            Some(pp) if !pp.fullpath.is_empty() => format!("{}.{}", pp.fullpath, path),
            _ => path.clone(),
        };

        let mut fqpp = if path_parent_id == Some(self.root) {
            let mut prefix = self.object_name.clone();
            if let RootKind::ObjectType { name } = &self.kind {
                if !self.master_names.contains(&node.name) {
                    prefix.push('#');
                    prefix.push_str(name);
                }
            }
            prefix
        } else {
            parent.fqpp.clone()
        };
        if initializing_set_doc {
            fqpp.push('#');
            fqpp.push_str(&node.name);
        } else {
            fqpp.push('.');
            fqpp.push_str(&path);
            if node.array {
                fqpp.push_str("[]");
            }
        }
        let fqpparts = match fqpp.split_once('.') {
            Some((object, rest)) => [object.to_string(), rest.replace("[]", "")],
            None => [fqpp.clone(), String::new()],
        };

        let in_document_array = path_parent.is_some_and(|pp| pp.array && pp.is_document())
            && node.name != "_id"
            && !initializing_set_doc;
        let history_id = node
            .history
            .then(|| node.property_id.clone().unwrap_or_else(|| fullpath.clone()));
        let unique_key_dep = node
            .unique_key
            .as_ref()
            .map(|key| format!("{fullpath}.{key}"));
        let forced_slot = node.index_slot.clone().map(|name| {
            IndexSlot::new(
                node.property_id.clone().unwrap_or_else(|| fqpp.clone()),
                node.unique,
                name,
            )
        });

        if let Some(id) = history_id {
            if !self.history_node_ids.contains(&id) {
                self.history_node_ids.push(id);
            }
        }
        if let Some(slot) = forced_slot {
            if !self.slots.iter().any(|s| s.name == slot.name) {
                self.slots.push(slot);
            }
        }

        let node = &mut self.nodes[id.index()];
        node.parent = Some(parent_id);
        node.path_parent = path_parent_id;
        node.path = path;
        node.docpath = docpath;
        node.fullpath = fullpath;
        node.fqpp = fqpp;
        node.fqpparts = fqpparts;
        node.initialized = true;
        if in_document_array {
            node.declared_dependencies.push("._id".into());
        }
        if node.history {
            node.declared_dependencies.push(HISTORY_PATH.into());
        }
        if let Some(dep) = unique_key_dep {
            node.declared_dependencies.push(dep);
        }
        if let Some(on_init) = node.hooks.on_init.take() {
            on_init(node);
        }
    }

    fn resolve_dependencies(&mut self) {
        for node in &mut self.nodes {
            let declared = std::mem::take(&mut node.declared_dependencies);
            for dep in declared {
                let absolute = absolute_dependency(&node.fullpath, &dep);
                node.add_dependency(absolute, true);
            }
        }

        let mut by_path: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, node) in self.nodes.iter().enumerate() {
            by_path.entry(node.fullpath.clone()).or_default().push(index);
        }
        loop {
            let mut changed = false;
            for index in 0..self.nodes.len() {
                let mut extra: Vec<(String, bool)> = Vec::new();
                for path in self.nodes[index].dependencies.keys() {
                    for &other in by_path.get(path).map(Vec::as_slice).unwrap_or(&[]) {
                        if other != index {
                            extra.extend(
                                self.nodes[other]
                                    .dependencies
                                    .iter()
                                    .map(|(p, h)| (p.clone(), *h)),
                            );
                        }
                    }
                }
                let node = &mut self.nodes[index];
                for (path, hard) in extra {
                    let before = node.dependencies.get(&path).copied();
                    node.add_dependency(path.clone(), hard);
                    if node.dependencies.get(&path).copied() != before {
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        // parents pick up their children's out-of-branch dependencies
        let order = self.post_order();
        for &id in &order {
            if id == self.root {
                continue;
            }
            let prefix = format!("{}.", self.nodes[id.index()].fullpath);
            let children = self.nodes[id.index()].children.clone();
            let mut extra = Vec::new();
            for child in children {
                for (path, hard) in &self.nodes[child.index()].dependencies {
                    if !path.starts_with(&prefix) {
                        extra.push((path.clone(), *hard));
                    }
                }
            }
            let node = &mut self.nodes[id.index()];
            for (path, hard) in extra {
                node.add_dependency(path, hard);
            }
        }

        // children inherit their parents' dependencies
        for &id in order.iter().rev() {
            let deps: Vec<(String, bool)> = self.nodes[id.index()]
                .dependencies
                .iter()
                .map(|(p, h)| (p.clone(), *h))
                .collect();
            let children = self.nodes[id.index()].children.clone();
            for child in children {
                let child = &mut self.nodes[child.index()];
                for (path, hard) in &deps {
                    child.add_dependency(path.clone(), *hard);
                }
            }
        }
    }

    fn post_order(&self) -> Vec<NodeId> {
        fn visit(tree: &SchemaTree, id: NodeId, out: &mut Vec<NodeId>) {
            for &child in &tree.nodes[id.index()].children {
                visit(tree, child, out);
            }
            out.push(id);
        }
        let mut out = Vec::with_capacity(self.nodes.len());
        visit(self, self.root, &mut out);
        out
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn kind(&self) -> &RootKind {
        &self.kind
    }

    pub fn type_name(&self) -> Option<&str> {
        match &self.kind {
            RootKind::ObjectType { name } => Some(name),
            RootKind::Object => None,
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn slots(&self) -> &[IndexSlot] {
        &self.slots
    }

    pub fn history_node_ids(&self) -> &[String] {
        &self.history_node_ids
    }

    /// The children that apply to `value`: for a set, the children of the
    /// shape selected by the value's discriminator.
    pub fn children_for(&self, id: NodeId, value: &Value) -> &[NodeId] {
        let node = self.node(id);
        match &node.kind {
            PropertyKind::Set(_) => match self.shape_for(id, value) {
                Some(shape) => &self.node(shape).children,
                None => &[],
            },
            _ => &node.children,
        }
    }

    /// The shape of a set element, selected by its discriminator value.
    pub fn shape_for(&self, set: NodeId, value: &Value) -> Option<NodeId> {
        let node = self.node(set);
        let PropertyKind::Set(spec) = &node.kind else {
            return None;
        };
        let discriminator = value.get(&spec.discriminator_key)?.as_str()?;
        self.shape_named(set, discriminator)
    }

    pub fn shape_named(&self, set: NodeId, name: &str) -> Option<NodeId> {
        self.node(set)
            .children
            .iter()
            .copied()
            .find(|&shape| self.node(shape).name == name)
    }

    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children
            .iter()
            .copied()
            .find(|&child| self.node(child).name == name)
    }

    /// Finds the first node at a dotted path. Element ids and indexes inside
    /// the path are skipped; inside a set every shape is searched.
    pub fn find_node(&self, path: &str) -> Option<NodeId> {
        self.find_nodes(path).into_iter().next()
    }

    pub fn find_nodes(&self, path: &str) -> Vec<NodeId> {
        let mut current: Vec<NodeId> = vec![self.root];
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            let mut next = Vec::new();
            for &id in &current {
                let node = self.node(id);
                if node.array
                    && id != self.root
                    && (is_id(segment) || as_integer(segment).is_some())
                    && self.child_named(id, segment).is_none()
                {
                    next.push(id);
                    continue;
                }
                if node.is_set() {
                    if let Some(shape) = self.shape_named(id, segment) {
                        next.push(shape);
                        continue;
                    }
                    for &shape in &node.children {
                        next.extend(self.child_named(shape, segment));
                    }
                } else {
                    next.extend(self.child_named(id, segment));
                }
            }
            if next.is_empty() {
                return next;
            }
            next.dedup();
            current = next;
        }
        if current == [self.root] && !path.is_empty() {
            return Vec::new();
        }
        current
    }

    pub fn find_node_by_id(&self, property_id: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.property_id.as_deref() == Some(property_id))
            .map(|n| n.id)
    }

    pub fn find_node_by_fqpp(&self, fqpp: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.fqpp == fqpp).map(|n| n.id)
    }

    pub fn require_node(&self, path: &str) -> Result<NodeId, SchemaError> {
        self.find_node(path).ok_or_else(|| {
            SchemaError::not_found(ResourceType::Property, path, "no such property")
        })
    }

    /// The node an index rebuild for `id` should run against. A reference's
    /// `_id` delegates to the reference itself.
    pub fn index_target(&self, id: NodeId) -> NodeId {
        let node = self.node(id);
        match node.parent {
            Some(parent)
                if node.name == "_id"
                    && matches!(self.node(parent).kind, PropertyKind::Reference(_)) =>
            {
                parent
            }
            _ => id,
        }
    }

    /// The node bound to a slot, matched by property id.
    pub fn slot_node(&self, slot: &IndexSlot) -> Option<NodeId> {
        self.find_node_by_id(&slot.id)
            .or_else(|| self.find_node_by_fqpp(&slot.id))
            .map(|id| self.index_target(id))
    }

    /// Pre-order traversal of the schema honouring walk control codes.
    /// Returns false if aborted.
    pub fn walk(&self, f: &mut impl FnMut(&Node) -> WalkControl) -> bool {
        fn visit(
            tree: &SchemaTree,
            id: NodeId,
            f: &mut impl FnMut(&Node) -> WalkControl,
        ) -> WalkControl {
            for &child in &tree.node(id).children {
                match f(tree.node(child)) {
                    WalkControl::Abort => return WalkControl::Abort,
                    WalkControl::SkipSiblings => break,
                    WalkControl::SkipChildren => {}
                    WalkControl::Continue => {
                        if visit(tree, child, f) == WalkControl::Abort {
                            return WalkControl::Abort;
                        }
                    }
                }
            }
            WalkControl::Continue
        }
        visit(self, self.root, f) != WalkControl::Abort
    }

    /// A JSON outline of the compiled tree, handy in logs and tests.
    pub fn outline(&self) -> Value {
        fn describe(tree: &SchemaTree, id: NodeId) -> Value {
            let node = tree.node(id);
            let mut out = Map::new();
            out.insert("type".into(), json!(node.kind.type_name()));
            out.insert("fullpath".into(), json!(node.fullpath));
            if node.array {
                out.insert("array".into(), json!(true));
            }
            if !node.children.is_empty() {
                let children: Map<String, Value> = node
                    .children
                    .iter()
                    .map(|&c| (tree.node(c).name.clone(), describe(tree, c)))
                    .collect();
                out.insert("properties".into(), Value::Object(children));
            }
            Value::Object(out)
        }
        describe(self, self.root)
    }
}

fn blank(id: NodeId, name: &str, kind: PropertyKind) -> Node {
    Node {
        id,
        property_id: None,
        name: name.to_string(),
        label: name.to_string(),
        kind,
        array: false,
        readable: true,
        writable: true,
        creatable: false,
        removable: false,
        optional: false,
        public: true,
        is_virtual: false,
        auto: false,
        force_id: false,
        read_access: AccessSpec::Inherit,
        write_access: AccessSpec::Inherit,
        update_access: AccessSpec::Inherit,
        acl: None,
        acl_override: false,
        indexed: false,
        unique: false,
        history: false,
        auditable: false,
        validators: Vec::new(),
        include: Vec::new(),
        default_value: None,
        write_priority: 0,
        defer_writes: false,
        write_on_create: true,
        can_push: true,
        can_pull: true,
        unique_values: false,
        min_items: 0,
        max_items: -1,
        max_shift: false,
        unique_key: None,
        merge_overwrite: false,
        index_slot: None,
        hooks: NodeHooks::default(),
        is_set_document: false,
        declared_dependencies: Vec::new(),
        parent: None,
        path_parent: None,
        path: String::new(),
        docpath: String::new(),
        fullpath: String::new(),
        fqpp: String::new(),
        fqpparts: [String::new(), String::new()],
        children: SmallVec::new(),
        dependencies: BTreeMap::new(),
        sorted_children: Vec::new(),
        initialized: false,
    }
}

/// Nesting depth of document-like definitions below and including `def`.
fn definition_depth(def: &PropertyDef) -> usize {
    match &def.kind {
        TypeDef::Document(doc) => {
            1 + doc.properties.iter().map(definition_depth).max().unwrap_or(0)
        }
        TypeDef::Set(set) => {
            1 + set
                .documents
                .iter()
                .flat_map(|shape| shape.properties.iter())
                .map(definition_depth)
                .max()
                .unwrap_or(0)
        }
        _ => 0,
    }
}

/// Resolves a dependency relative to the node at `fullpath`. Each leading
/// dot climbs one segment.
fn absolute_dependency(fullpath: &str, dep: &str) -> String {
    let dots = dep.chars().take_while(|c| *c == '.').count();
    if dots == 0 {
        return dep.to_string();
    }
    let rest = &dep[dots..];
    let segments: Vec<&str> = fullpath.split('.').filter(|s| !s.is_empty()).collect();
    let keep = segments.len().saturating_sub(dots);
    let mut parts: Vec<&str> = segments[..keep].to_vec();
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::definition::SetShapeDef;

    fn widget() -> SchemaTree {
        SchemaTree::compile(
            "c_widget",
            vec![
                PropertyDef::string("c_name").unique(),
                PropertyDef::document(
                    "c_items",
                    vec![PropertyDef::string("name"), PropertyDef::number("qty")],
                )
                .array()
                .unique_key("name"),
                PropertyDef::set(
                    "c_shapes",
                    vec![
                        SetShapeDef::new("circle", vec![PropertyDef::number("radius")]),
                        SetShapeDef::new("square", vec![PropertyDef::number("side")]),
                    ],
                ),
                PropertyDef::document("c_meta", vec![PropertyDef::string("note")]),
            ],
            CompileOptions::internal(),
        )
        .unwrap()
    }

    #[test]
    fn paths_are_computed_from_the_path_parent() {
        let tree = widget();
        let qty = tree.node(tree.find_node("c_items.qty").unwrap());
        assert_eq!(qty.fullpath, "c_items.qty");
        assert_eq!(qty.docpath, "qty");
        assert_eq!(qty.fqpp, "c_widget.c_items[].qty");
        assert_eq!(qty.fqpparts, ["c_widget".to_string(), "c_items.qty".to_string()]);

        let note = tree.node(tree.find_node("c_meta.note").unwrap());
        assert_eq!(note.docpath, "c_meta.note");

        let radius = tree.node(tree.find_node("c_shapes.radius").unwrap());
        assert_eq!(radius.fullpath, "c_shapes.radius");
        assert_eq!(radius.docpath, "radius");
        assert_eq!(radius.fqpp, "c_widget.c_shapes[]#circle.radius");
        assert_eq!(tree.node(radius.path_parent.unwrap()).name, "c_shapes");
    }

    #[test]
    fn array_documents_depend_on_their_element_id() {
        let tree = widget();
        let qty = tree.node(tree.find_node("c_items.qty").unwrap());
        assert_eq!(qty.dependencies.get("c_items._id"), Some(&true));
        let items = tree.node(tree.find_node("c_items").unwrap());
        assert!(items.dependencies.contains_key("c_items.name"));
        assert!(tree.find_node("c_items._id").is_some());
        assert!(tree.find_node("c_meta._id").is_none());
    }

    #[test]
    fn set_shapes_get_id_and_discriminator() {
        let tree = widget();
        let set = tree.find_node("c_shapes").unwrap();
        let circle = tree.shape_named(set, "circle").unwrap();
        let names: Vec<&str> = tree
            .node(circle)
            .children
            .iter()
            .map(|&c| tree.node(c).name.as_str())
            .collect();
        assert_eq!(names, vec!["_id", "name", "radius"]);
        let element = json!({"name": "square", "side": 2});
        assert_eq!(tree.shape_for(set, &element), tree.shape_named(set, "square"));
    }

    #[test]
    fn init_is_idempotent() {
        let mut tree = widget();
        let id = tree.find_node("c_items.qty").unwrap();
        let before = tree.node(id).clone();
        assert!(!tree.init_node(id));
        assert!(!tree.init_node(tree.root()));
        let after = tree.node(id);
        assert_eq!(before.fullpath, after.fullpath);
        assert_eq!(before.fqpp, after.fqpp);
        assert_eq!(before.docpath, after.docpath);
    }

    #[test]
    fn relative_dependencies_climb_segments() {
        assert_eq!(absolute_dependency("c_items.qty", "._id"), "c_items._id");
        assert_eq!(absolute_dependency("c_a.b.c", "..x"), "c_a.x");
        assert_eq!(absolute_dependency("c_a", "c_b"), "c_b");
    }

    #[test]
    fn dependencies_close_transitively() {
        let tree = SchemaTree::compile(
            "c_obj",
            vec![
                PropertyDef::string("c_a").depends_on("c_b"),
                PropertyDef::string("c_b").depends_on("c_c"),
                PropertyDef::string("c_c"),
            ],
            CompileOptions::internal(),
        )
        .unwrap();
        let a = tree.node(tree.find_node("c_a").unwrap());
        assert!(a.dependencies.contains_key("c_b"));
        assert!(a.dependencies.contains_key("c_c"));
        assert!(!a.dependencies.contains_key("c_a"));
    }

    #[test]
    fn typed_nodes_carry_the_type_in_fqpp() {
        let object_type = ObjectTypeDef {
            id: None,
            name: "big".into(),
            label: "Big".into(),
            properties: vec![PropertyDef::number("c_size")],
        };
        let tree = SchemaTree::compile_typed(
            "c_widget",
            vec![PropertyDef::string("c_name")],
            &object_type,
            CompileOptions::internal(),
            20,
        )
        .unwrap();
        assert_eq!(tree.node(tree.find_node("c_size").unwrap()).fqpp, "c_widget#big.c_size");
        assert_eq!(tree.node(tree.find_node("c_name").unwrap()).fqpp, "c_widget.c_name");
        assert_eq!(tree.type_name(), Some("big"));
    }

    #[test]
    fn forced_slots_register_on_the_root() {
        let tree = SchemaTree::compile(
            "c_obj",
            vec![PropertyDef::string("c_a").with_id("p1").indexed().index_slot("i3")],
            CompileOptions::internal(),
        )
        .unwrap();
        assert_eq!(tree.slots(), &[IndexSlot::new("p1", false, "i3")]);
    }

    #[test]
    fn property_limit_is_enforced() {
        let props = (0..3).map(|i| PropertyDef::string(format!("c_{i}"))).collect();
        let options = CompileOptions {
            max_properties: Some(2),
            ..CompileOptions::internal()
        };
        let err = SchemaTree::compile("c_obj", props, options).unwrap_err();
        assert_eq!(err.code_str(), "validation");
    }

    #[test]
    fn walk_honours_skip_children() {
        let tree = widget();
        let mut seen = Vec::new();
        tree.walk(&mut |node| {
            seen.push(node.fullpath.clone());
            if node.name == "c_items" {
                WalkControl::SkipChildren
            } else {
                WalkControl::Continue
            }
        });
        assert!(seen.contains(&"c_items".to_string()));
        assert!(!seen.contains(&"c_items.qty".to_string()));
        assert!(seen.contains(&"c_meta.note".to_string()));
    }
}
