use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::ir::Class;
use crate::signature::{OBJECT, is_known_collection, is_primitive};

/// Immutable class index keyed by canonical name.
///
/// Built once from the scanned classes; all reads are lock-free. Project
/// classes win name collisions against classpath classes.
pub(crate) struct ClassIndex {
    classes: BTreeMap<String, Class>,
}

impl ClassIndex {
    pub(crate) fn build(classes: Vec<Class>) -> Self {
        let mut map: BTreeMap<String, Class> = BTreeMap::new();
        for class in classes {
            match map.get(&class.name) {
                None => {
                    map.insert(class.name.clone(), class);
                }
                Some(existing) => {
                    if class.from_project && !existing.from_project {
                        debug!(
                            "project class {} shadows a classpath class of the same name",
                            class.name
                        );
                        map.insert(class.name.clone(), class);
                    } else {
                        debug!("duplicate class {} ignored", class.name);
                    }
                }
            }
        }
        Self { classes: map }
    }

    pub(crate) fn find(&self, name: &str) -> Option<&Class> {
        self.classes.get(name)
    }

    /// Look up a class, substituting a synthetic empty record for names the
    /// search path cannot resolve so that analysis degrades instead of
    /// aborting.
    pub(crate) fn resolve(&self, name: &str) -> Cow<'_, Class> {
        match self.classes.get(name) {
            Some(class) => Cow::Borrowed(class),
            None => {
                warn!("class not resolvable on the search path: {name}");
                Cow::Owned(Class::synthetic(name))
            }
        }
    }

    /// Project classes in name order, for deterministic extraction.
    pub(crate) fn project_classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.values().filter(|class| class.from_project)
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    /// Supertype chain of `name` (exclusive), superclasses before interfaces,
    /// bounded against malformed hierarchies.
    pub(crate) fn supertypes(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue = vec![name.to_string()];
        while let Some(current) = queue.pop() {
            let Some(class) = self.classes.get(&current) else {
                continue;
            };
            if let Some(super_name) = &class.super_name {
                if seen.insert(super_name.clone()) {
                    chain.push(super_name.clone());
                    queue.push(super_name.clone());
                }
            }
            for interface in &class.interfaces {
                if seen.insert(interface.clone()) {
                    chain.push(interface.clone());
                    queue.push(interface.clone());
                }
            }
        }
        chain
    }

    pub(crate) fn is_subtype(&self, name: &str, supertype: &str) -> bool {
        name == supertype || self.supertypes(name).iter().any(|s| s == supertype)
    }

    /// Most specific common supertype of two type names; `java.lang.Object`
    /// when the lattice cannot be queried.
    pub(crate) fn common_supertype(&self, a: &str, b: &str) -> String {
        if a == b {
            return a.to_string();
        }
        if is_primitive(a) || is_primitive(b) {
            return OBJECT.to_string();
        }
        if self.is_subtype(a, b) {
            return b.to_string();
        }
        if self.is_subtype(b, a) {
            return a.to_string();
        }
        let ancestors_of_a: BTreeSet<String> = self.supertypes(a).into_iter().collect();
        for candidate in self.supertypes(b) {
            if candidate != OBJECT && ancestors_of_a.contains(&candidate) {
                return candidate;
            }
        }
        OBJECT.to_string()
    }

    /// The more specific of two type names, preferring resolvable subtypes
    /// and treating `java.lang.Object` as the least informative.
    pub(crate) fn more_specific<'a>(&self, a: &'a str, b: &'a str) -> &'a str {
        if a == b || b == OBJECT {
            return a;
        }
        if a == OBJECT {
            return b;
        }
        if self.is_subtype(b, a) {
            return b;
        }
        a
    }

    /// Collection detection: the well-known container table, arrays, or any
    /// resolvable class whose supertype chain reaches `java.util.Collection`.
    pub(crate) fn is_collection(&self, name: &str) -> bool {
        is_known_collection(name)
            || self
                .supertypes(name)
                .iter()
                .any(|s| s == "java.util.Collection")
    }
}
