//! Whole-build reachability of methods.
//!
//! During the analysis pass the driver registers every object instance by
//! its pre-order compile index and the front end reports each object's
//! methods and the references inside them. [`UnusedMethods::find_unused`]
//! then walks the references from the root's first public method; the final
//! pass asks [`UnusedMethods::is_reachable`] before emitting a method.
//!
//! A method counts as used in every copy of its file once any instance of
//! that file uses it, so all copies of one file compile identically and any
//! of them may be merged into any parent.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodRef {
    /// A bare name, possibly a method of the same object.
    Local(String),
    /// `instance.method`, through one of the object's OBJ declarations.
    Object { instance: String, method: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub public: bool,
    pub refs: Vec<MethodRef>,
}

#[derive(Debug, Default)]
struct ObjectUsage {
    name: String,
    children: Vec<usize>,
    methods: Option<Vec<MethodInfo>>,
    /// Instance name to the index of its declaration in the child list.
    instances: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct UnusedMethods {
    objects: BTreeMap<usize, ObjectUsage>,
    /// Used method ids by object filename.
    reachable: Option<BTreeMap<String, BTreeSet<usize>>>,
}

impl UnusedMethods {
    pub fn record_instance(&mut self, name: &str, index: usize, parent: Option<usize>) {
        self.objects.insert(
            index,
            ObjectUsage {
                name: name.to_owned(),
                ..ObjectUsage::default()
            },
        );
        if let Some(parent) = parent.and_then(|p| self.objects.get_mut(&p)) {
            parent.children.push(index);
        }
    }

    /// Replaces what is known about the methods of object `index`.
    pub fn record_object(
        &mut self,
        index: usize,
        methods: Vec<MethodInfo>,
        instances: impl IntoIterator<Item = (String, usize)>,
    ) {
        let object = self.objects.entry(index).or_default();
        object.methods = Some(methods);
        object.instances = instances.into_iter().collect();
    }

    pub fn is_analysed(&self) -> bool {
        self.reachable.is_some()
    }

    /// Computes reachability once and returns the number of unused methods.
    pub fn find_unused(&mut self) -> usize {
        let mut reachable = BTreeSet::new();
        let mut pending = vec![];
        if let Some((&root, object)) = self.objects.iter().next() {
            let entry = object
                .methods
                .as_ref()
                .and_then(|methods| methods.iter().position(|m| m.public));
            if let Some(entry) = entry {
                pending.push((root, entry));
            }
        }

        while let Some((index, method)) = pending.pop() {
            if !reachable.insert((index, method)) {
                continue;
            }
            let object = &self.objects[&index];
            let Some(methods) = &object.methods else {
                continue;
            };
            for r in &methods[method].refs {
                let target = match r {
                    MethodRef::Local(name) => method_id(methods, name).map(|m| (index, m)),
                    MethodRef::Object { instance, method } => object
                        .instances
                        .get(instance)
                        .and_then(|&slot| object.children.get(slot))
                        .and_then(|child| {
                            let methods = self.objects[child].methods.as_ref()?;
                            method_id(methods, method).map(|m| (*child, m))
                        }),
                };
                if let Some(target) = target {
                    pending.push(target);
                }
            }
        }

        let mut used: BTreeMap<String, BTreeSet<usize>> = BTreeMap::new();
        for (index, method) in reachable {
            used.entry(self.objects[&index].name.clone())
                .or_default()
                .insert(method);
        }

        let (mut total, mut unused) = (0, 0);
        for object in self.objects.values() {
            let Some(methods) = &object.methods else {
                continue;
            };
            for (id, method) in methods.iter().enumerate() {
                total += 1;
                if !used.get(&object.name).is_some_and(|ids| ids.contains(&id)) {
                    unused += 1;
                    debug!("unused method {}.{}", object.name, method.name);
                }
            }
        }
        info!("{} of {} methods unused", unused, total);

        self.reachable = Some(used);
        unused
    }

    /// Every method counts as reachable until analysis ran, and in objects
    /// whose front end reported nothing.
    pub fn is_reachable(&self, index: usize, method: usize) -> bool {
        let Some(reachable) = &self.reachable else {
            return true;
        };
        match self.objects.get(&index) {
            Some(ObjectUsage {
                name,
                methods: Some(_),
                ..
            }) => reachable.get(name).is_some_and(|ids| ids.contains(&method)),
            _ => true,
        }
    }
}

fn method_id(methods: &[MethodInfo], name: &str) -> Option<usize> {
    methods.iter().position(|m| m.name == name)
}
