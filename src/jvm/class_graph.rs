use super::{
    BinaryName, ClassAccessFlags, ConstantPool, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, RenderDescriptor, UnqualifiedName,
};
use crate::util::RefId;
use elsa::map::FrozenMap;
use elsa::FrozenVec;
use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::fmt::Debug;
use typed_arena::Arena;

pub struct ClassGraphArenas<'g> {
    class_arena: Arena<ClassData<'g>>,
    method_arena: Arena<MethodData<'g>>,
    field_arena: Arena<FieldData<'g>>,
}

impl<'g> ClassGraphArenas<'g> {
    pub fn new() -> Self {
        ClassGraphArenas {
            class_arena: Arena::new(),
            method_arena: Arena::new(),
            field_arena: Arena::new(),
        }
    }
}

impl<'g> Default for ClassGraphArenas<'g> {
    fn default() -> Self {
        ClassGraphArenas::new()
    }
}

/// Classes known to the VM, along with their members
///
/// A class missing from the graph is a class that has not been loaded yet: references to it (or
/// to its members) stay unresolved in the generated IL.
pub struct ClassGraph<'g> {
    arenas: &'g ClassGraphArenas<'g>,
    classes: FrozenMap<&'g BinaryName, &'g ClassData<'g>>,
}

impl<'g> ClassGraph<'g> {
    /// New empty graph
    pub fn new(arenas: &'g ClassGraphArenas<'g>) -> Self {
        ClassGraph {
            arenas,
            classes: FrozenMap::new(),
        }
    }

    pub fn lookup_class(&'g self, name: &BinaryName) -> Option<&'g ClassData<'g>> {
        self.classes.get(name)
    }

    /// Add a new class to the class graph
    pub fn add_class(&self, data: ClassData<'g>) -> &'g ClassData<'g> {
        let data = &*self.arenas.class_arena.alloc(data);
        self.classes.insert(&data.name, data);
        data
    }

    /// Add a field to the class graph and to its class
    pub fn add_field(&self, field: FieldData<'g>) -> &'g FieldData<'g> {
        let data = &*self.arenas.field_arena.alloc(field);
        data.class.fields.push(data);
        data
    }

    /// Add a method to the class graph and to its class
    pub fn add_method(&self, method: MethodData<'g>) -> &'g MethodData<'g> {
        if let Some(m) = method.class.methods.iter().find(|m| {
            m.name == method.name
                && m.descriptor == method.descriptor
                && m.access_flags.contains(MethodAccessFlags::STATIC)
                    == method.access_flags.contains(MethodAccessFlags::STATIC)
        }) {
            m
        } else {
            let data = &*self.arenas.method_arena.alloc(method);
            data.class.methods.push(data);
            data
        }
    }

    /// Is `sub_class` the same as, a subclass of, or an implementor of `super_class`?
    ///
    /// This does a search up the superclasses and superinterfaces looking for the super type.
    pub fn is_subtype_of(sub_class: &'g ClassData<'g>, super_class: &'g ClassData<'g>) -> bool {
        let mut to_visit: Vec<&'g ClassData<'g>> = vec![sub_class];
        let mut dont_revisit: HashSet<RefId<'g, ClassData<'g>>> = HashSet::new();
        dont_revisit.insert(RefId(sub_class));

        // Optimization: if the super type is a class, then skip visiting interfaces
        let super_is_class = !super_class.is_interface();

        while let Some(class_data) = to_visit.pop() {
            if std::ptr::eq(class_data, super_class) {
                return true;
            }
            if let Some(superclass) = class_data.superclass {
                if dont_revisit.insert(RefId(superclass)) {
                    to_visit.push(superclass);
                }
            }
            if !super_is_class {
                for interface in class_data.interfaces.iter() {
                    if dont_revisit.insert(RefId(interface)) {
                        to_visit.push(interface);
                    }
                }
            }
        }

        false
    }

    /// Find a field by name, searching superinterfaces and superclasses as in field resolution
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-5.html#jvms-5.4.3.2
    pub fn find_field(
        class: &'g ClassData<'g>,
        name: &UnqualifiedName,
        descriptor: &FieldType,
    ) -> Option<&'g FieldData<'g>> {
        let mut next_class = Some(class);
        while let Some(class) = next_class {
            if let Some(field) = class
                .fields
                .iter()
                .find(|f| &f.name == name && &f.descriptor == descriptor)
            {
                return Some(field);
            }
            for interface in class.interfaces.iter() {
                if let Some(field) = Self::find_field(interface, name, descriptor) {
                    return Some(field);
                }
            }
            next_class = class.superclass;
        }
        None
    }

    /// Find a method by name and descriptor, searching superclasses then superinterfaces
    pub fn find_method(
        class: &'g ClassData<'g>,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Option<&'g MethodData<'g>> {
        let matches = |m: &&'g MethodData<'g>| &m.name == name && &m.descriptor == descriptor;

        let mut next_class = Some(class);
        while let Some(class) = next_class {
            if let Some(method) = class.methods.iter().find(matches) {
                return Some(method);
            }
            next_class = class.superclass;
        }

        let mut next_class = Some(class);
        while let Some(class) = next_class {
            for interface in class.interfaces.iter() {
                if let Some(method) = Self::find_method(interface, name, descriptor) {
                    return Some(method);
                }
            }
            next_class = class.superclass;
        }
        None
    }
}

pub struct ClassData<'g> {
    /// Name of the class
    pub name: BinaryName,

    /// Superclass is only ever missing for `java/lang/Object` itself
    pub superclass: Option<&'g ClassData<'g>>,

    /// Interfaces implemented (or super-interfaces)
    pub interfaces: FrozenVec<&'g ClassData<'g>>,

    pub access_flags: ClassAccessFlags,

    /// Has `<clinit>` finished running?
    pub initialized: Cell<bool>,

    pub constant_pool: ConstantPool,

    /// Methods
    pub methods: FrozenVec<&'g MethodData<'g>>,

    /// Fields
    pub fields: FrozenVec<&'g FieldData<'g>>,
}

impl<'g> ClassData<'g> {
    pub fn new(
        name: BinaryName,
        superclass: Option<&'g ClassData<'g>>,
        access_flags: ClassAccessFlags,
    ) -> ClassData<'g> {
        ClassData {
            name,
            superclass,
            interfaces: FrozenVec::new(),
            access_flags,
            initialized: Cell::new(false),
            constant_pool: ConstantPool::new(),
            methods: FrozenVec::new(),
            fields: FrozenVec::new(),
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::FINAL)
    }
}

impl<'g> Debug for ClassData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())
    }
}

pub struct MethodData<'g> {
    /// Class
    pub class: &'g ClassData<'g>,

    /// Name of the method
    pub name: UnqualifiedName,

    /// Type of the method
    pub descriptor: MethodDescriptor,

    pub access_flags: MethodAccessFlags,

    /// Slot in the virtual function table (`None` for static and private methods)
    pub vtable_slot: Option<u16>,
}

impl<'g> Debug for MethodData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "{}.{}{}",
            self.class.name.as_str(),
            self.name.as_str(),
            self.descriptor.render(),
        ))
    }
}

/// Facts about a field that hold for the whole life of the class
///
/// These are gathered by looking ahead at every store to the field in its declaring class (eg.
/// a private field only ever assigned a freshly allocated `new int[16]`).
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct FieldFacts {
    /// The field is never observed holding `null`
    pub non_null: bool,

    /// The field always holds an array of this length
    pub array_length: Option<i32>,

    /// The field always holds an instance of exactly this class
    pub exact_class: Option<BinaryName>,
}

pub struct FieldData<'g> {
    /// Class
    ///
    /// Note: this is a pointer back to the class (so don't derive `Debug`)
    pub class: &'g ClassData<'g>,

    /// Name of the field
    pub name: UnqualifiedName,

    /// Type of the field
    pub descriptor: FieldType,

    pub access_flags: FieldAccessFlags,

    pub facts: FieldFacts,
}

impl<'g> Debug for FieldData<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "{}.{}:{}",
            self.class.name.as_str(),
            self.name.as_str(),
            self.descriptor.render(),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::ParseDescriptor;

    fn name(s: &str) -> BinaryName {
        BinaryName::from_string(s.to_owned()).unwrap()
    }

    #[test]
    fn subtyping_and_member_lookup() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);

        let object = graph.add_class(ClassData::new(
            BinaryName::OBJECT,
            None,
            ClassAccessFlags::PUBLIC,
        ));
        let runnable = graph.add_class(ClassData::new(
            name("java/lang/Runnable"),
            Some(object),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE,
        ));
        let task = graph.add_class(ClassData::new(
            name("Task"),
            Some(object),
            ClassAccessFlags::PUBLIC,
        ));
        task.interfaces.push(runnable);

        let run = graph.add_method(MethodData {
            class: runnable,
            name: UnqualifiedName::from_string("run".to_owned()).unwrap(),
            descriptor: MethodDescriptor::parse("()V").unwrap(),
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            vtable_slot: None,
        });
        let count = graph.add_field(FieldData {
            class: object,
            name: UnqualifiedName::from_string("count".to_owned()).unwrap(),
            descriptor: FieldType::int(),
            access_flags: FieldAccessFlags::PUBLIC,
            facts: FieldFacts::default(),
        });

        assert!(ClassGraph::is_subtype_of(task, runnable));
        assert!(ClassGraph::is_subtype_of(task, object));
        assert!(!ClassGraph::is_subtype_of(object, task));
        assert!(std::ptr::eq(
            ClassGraph::find_method(task, &run.name, &run.descriptor).unwrap(),
            run
        ));
        assert!(std::ptr::eq(
            ClassGraph::find_field(task, &count.name, &FieldType::int()).unwrap(),
            count
        ));
        assert!(graph.lookup_class(&name("Task")).is_some());
        assert!(graph.lookup_class(&name("Missing")).is_none());
    }
}
