use crate::jvm::{FieldType, Kind, MethodDescriptor, ParseDescriptor, TypeClassifier};
use std::io::Result;

/// Tags of constant pool entries, as they appear in a class file
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ConstantTag {
    Utf8,
    Integer,
    Float,
    Long,
    Double,
    Class,
    String,
    FieldRef,
    MethodRef,
    InterfaceMethodRef,
    NameAndType,
    MethodHandle,
    MethodType,
    InvokeDynamic,
}

/// Class reference, with its kind pre-resolved
#[derive(Clone, Debug)]
pub struct ClassConstant {
    /// Binary name, or descriptor for array classes (eg. `[I`)
    pub name: String,
    pub kind: Kind,
}

/// Field reference, with the field's kind pre-resolved
#[derive(Clone, Debug)]
pub struct FieldRefConstant {
    pub class: String,
    pub name: String,
    pub descriptor: FieldType<String>,
    pub kind: Kind,
}

/// Method or interface-method reference, with parameter and result kinds
/// pre-resolved so no classification happens during interpretation
#[derive(Clone, Debug)]
pub struct MethodRefConstant {
    pub class: String,
    pub name: String,
    pub descriptor: MethodDescriptor<String>,
    pub parameter_kinds: Vec<Kind>,
    pub result_kind: Kind,
}

#[derive(Clone, Debug)]
enum Entry {
    /// Index 0 and the slot following a `Long`/`Double` entry
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(ClassConstant),
    String(String),
    FieldRef(FieldRefConstant),
    MethodRef(MethodRefConstant),
    InterfaceMethodRef(MethodRefConstant),
    NameAndType { name: String, descriptor: String },
    MethodHandle { reference_kind: u8, reference: u16 },
    MethodType(MethodDescriptor<String>),
    InvokeDynamic { bootstrap_method: u16, signature: MethodRefConstant },
}

/// Constant pool of a class, with descriptors parsed and kinds resolved at
/// construction time.
///
/// Entry 0 is always unusable (class file indices start at 1) and so is the
/// slot after every `Long` or `Double` entry.
pub struct ConstantsPool {
    entries: Vec<Entry>,
}

impl ConstantsPool {
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            entries: vec![Entry::Unusable],
        }
    }

    fn push(&mut self, entry: Entry) -> u16 {
        let index = self.entries.len() as u16;
        let two_slots = matches!(&entry, Entry::Long(_) | Entry::Double(_));
        self.entries.push(entry);
        if two_slots {
            self.entries.push(Entry::Unusable);
        }
        index
    }

    pub fn add_utf8(&mut self, value: impl Into<String>) -> u16 {
        self.push(Entry::Utf8(value.into()))
    }

    pub fn add_integer(&mut self, value: i32) -> u16 {
        self.push(Entry::Integer(value))
    }

    pub fn add_float(&mut self, value: f32) -> u16 {
        self.push(Entry::Float(value))
    }

    pub fn add_long(&mut self, value: i64) -> u16 {
        self.push(Entry::Long(value))
    }

    pub fn add_double(&mut self, value: f64) -> u16 {
        self.push(Entry::Double(value))
    }

    pub fn add_string(&mut self, value: impl Into<String>) -> u16 {
        self.push(Entry::String(value.into()))
    }

    /// Add a class constant. Array classes (names starting with `[`) are
    /// references no matter their element type; plain classes consult the
    /// classifier.
    pub fn add_class(&mut self, name: impl Into<String>, classifier: &dyn TypeClassifier) -> u16 {
        let name = name.into();
        let kind = if name.starts_with('[') || !classifier.is_word_class(&name) {
            Kind::Reference
        } else {
            Kind::Word
        };
        self.push(Entry::Class(ClassConstant { name, kind }))
    }

    pub fn add_field_ref(
        &mut self,
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: &str,
        classifier: &dyn TypeClassifier,
    ) -> Result<u16> {
        let descriptor = FieldType::<String>::parse(descriptor)?;
        let kind = Kind::of(&descriptor, classifier);
        Ok(self.push(Entry::FieldRef(FieldRefConstant {
            class: class.into(),
            name: name.into(),
            descriptor,
            kind,
        })))
    }

    fn method_ref(
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: &str,
        classifier: &dyn TypeClassifier,
    ) -> Result<MethodRefConstant> {
        let descriptor = MethodDescriptor::<String>::parse(descriptor)?;
        let parameter_kinds = descriptor
            .parameters
            .iter()
            .map(|p| Kind::of(p, classifier))
            .collect();
        let result_kind = match &descriptor.return_type {
            None => Kind::Void,
            Some(ty) => Kind::of(ty, classifier),
        };
        Ok(MethodRefConstant {
            class: class.into(),
            name: name.into(),
            descriptor,
            parameter_kinds,
            result_kind,
        })
    }

    pub fn add_method_ref(
        &mut self,
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: &str,
        classifier: &dyn TypeClassifier,
    ) -> Result<u16> {
        let constant = Self::method_ref(class, name, descriptor, classifier)?;
        Ok(self.push(Entry::MethodRef(constant)))
    }

    pub fn add_interface_method_ref(
        &mut self,
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: &str,
        classifier: &dyn TypeClassifier,
    ) -> Result<u16> {
        let constant = Self::method_ref(class, name, descriptor, classifier)?;
        Ok(self.push(Entry::InterfaceMethodRef(constant)))
    }

    pub fn add_name_and_type(
        &mut self,
        name: impl Into<String>,
        descriptor: impl Into<String>,
    ) -> u16 {
        self.push(Entry::NameAndType {
            name: name.into(),
            descriptor: descriptor.into(),
        })
    }

    pub fn add_method_handle(&mut self, reference_kind: u8, reference: u16) -> u16 {
        self.push(Entry::MethodHandle {
            reference_kind,
            reference,
        })
    }

    pub fn add_method_type(&mut self, descriptor: &str) -> Result<u16> {
        let descriptor = MethodDescriptor::<String>::parse(descriptor)?;
        Ok(self.push(Entry::MethodType(descriptor)))
    }

    /// Add an `invokedynamic` call site constant. Only the call site's own
    /// signature matters for stack effects; the bootstrap method index is
    /// kept but never interpreted.
    pub fn add_invoke_dynamic(
        &mut self,
        bootstrap_method: u16,
        name: impl Into<String>,
        descriptor: &str,
        classifier: &dyn TypeClassifier,
    ) -> Result<u16> {
        let signature = Self::method_ref("", name, descriptor, classifier)?;
        Ok(self.push(Entry::InvokeDynamic {
            bootstrap_method,
            signature,
        }))
    }

    fn entry(&self, index: u16) -> Option<&Entry> {
        match self.entries.get(index as usize) {
            None | Some(Entry::Unusable) => None,
            Some(entry) => Some(entry),
        }
    }

    /// Tag of the entry at `index`, or `None` for an unusable or out of
    /// range index
    pub fn tag_at(&self, index: u16) -> Option<ConstantTag> {
        Some(match self.entry(index)? {
            Entry::Unusable => return None,
            Entry::Utf8(_) => ConstantTag::Utf8,
            Entry::Integer(_) => ConstantTag::Integer,
            Entry::Float(_) => ConstantTag::Float,
            Entry::Long(_) => ConstantTag::Long,
            Entry::Double(_) => ConstantTag::Double,
            Entry::Class(_) => ConstantTag::Class,
            Entry::String(_) => ConstantTag::String,
            Entry::FieldRef(_) => ConstantTag::FieldRef,
            Entry::MethodRef(_) => ConstantTag::MethodRef,
            Entry::InterfaceMethodRef(_) => ConstantTag::InterfaceMethodRef,
            Entry::NameAndType { .. } => ConstantTag::NameAndType,
            Entry::MethodHandle { .. } => ConstantTag::MethodHandle,
            Entry::MethodType(_) => ConstantTag::MethodType,
            Entry::InvokeDynamic { .. } => ConstantTag::InvokeDynamic,
        })
    }

    pub fn utf8_at(&self, index: u16) -> Option<&str> {
        match self.entry(index)? {
            Entry::Utf8(value) => Some(value),
            _ => None,
        }
    }

    pub fn integer_at(&self, index: u16) -> Option<i32> {
        match self.entry(index)? {
            Entry::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn float_at(&self, index: u16) -> Option<f32> {
        match self.entry(index)? {
            Entry::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn long_at(&self, index: u16) -> Option<i64> {
        match self.entry(index)? {
            Entry::Long(value) => Some(*value),
            _ => None,
        }
    }

    pub fn double_at(&self, index: u16) -> Option<f64> {
        match self.entry(index)? {
            Entry::Double(value) => Some(*value),
            _ => None,
        }
    }

    pub fn string_at(&self, index: u16) -> Option<&str> {
        match self.entry(index)? {
            Entry::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn name_and_type_at(&self, index: u16) -> Option<(&str, &str)> {
        match self.entry(index)? {
            Entry::NameAndType { name, descriptor } => Some((name, descriptor)),
            _ => None,
        }
    }

    pub fn method_handle_at(&self, index: u16) -> Option<(u8, u16)> {
        match self.entry(index)? {
            Entry::MethodHandle {
                reference_kind,
                reference,
            } => Some((*reference_kind, *reference)),
            _ => None,
        }
    }

    pub fn method_type_at(&self, index: u16) -> Option<&MethodDescriptor<String>> {
        match self.entry(index)? {
            Entry::MethodType(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    /// Bootstrap method index and call site signature of an
    /// `invokedynamic` constant
    pub fn invoke_dynamic_at(&self, index: u16) -> Option<(u16, &MethodRefConstant)> {
        match self.entry(index)? {
            Entry::InvokeDynamic {
                bootstrap_method,
                signature,
            } => Some((*bootstrap_method, signature)),
            _ => None,
        }
    }

    pub fn class_at(&self, index: u16) -> Option<&ClassConstant> {
        match self.entry(index)? {
            Entry::Class(constant) => Some(constant),
            _ => None,
        }
    }

    pub fn field_at(&self, index: u16) -> Option<&FieldRefConstant> {
        match self.entry(index)? {
            Entry::FieldRef(constant) => Some(constant),
            _ => None,
        }
    }

    /// Method signature behind `index`, accepting plain method refs,
    /// interface method refs, and `invokedynamic` call sites alike
    pub fn signature_at(&self, index: u16) -> Option<&MethodRefConstant> {
        match self.entry(index)? {
            Entry::MethodRef(constant) | Entry::InterfaceMethodRef(constant) => Some(constant),
            Entry::InvokeDynamic { signature, .. } => Some(signature),
            _ => None,
        }
    }
}

impl Default for ConstantsPool {
    fn default() -> ConstantsPool {
        ConstantsPool::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::NoWordTypes;

    #[test]
    fn long_entries_take_two_slots() {
        let mut pool = ConstantsPool::new();
        let long_index = pool.add_long(42);
        let int_index = pool.add_integer(1);
        assert_eq!(long_index, 1);
        assert_eq!(int_index, 3);
        assert_eq!(pool.tag_at(0), None);
        assert_eq!(pool.tag_at(1), Some(ConstantTag::Long));
        assert_eq!(pool.tag_at(2), None);
        assert_eq!(pool.tag_at(3), Some(ConstantTag::Integer));
        assert_eq!(pool.tag_at(4), None);
    }

    #[test]
    fn method_ref_kinds_resolved() {
        let mut pool = ConstantsPool::new();
        let index = pool
            .add_method_ref(
                "java/util/List",
                "set",
                "(ILjava/lang/Object;)Ljava/lang/Object;",
                &NoWordTypes,
            )
            .unwrap();
        let constant = pool.signature_at(index).unwrap();
        assert_eq!(constant.parameter_kinds, vec![Kind::Int, Kind::Reference]);
        assert_eq!(constant.result_kind, Kind::Reference);
    }

    #[test]
    fn typed_accessors_reject_wrong_tags() {
        let mut pool = ConstantsPool::new();
        let utf8 = pool.add_utf8("hello");
        let string = pool.add_string("world");
        let nat = pool.add_name_and_type("run", "()V");
        let handle = pool.add_method_handle(6, string);
        let indy = pool
            .add_invoke_dynamic(0, "apply", "()Ljava/lang/Object;", &NoWordTypes)
            .unwrap();

        assert_eq!(pool.utf8_at(utf8), Some("hello"));
        assert_eq!(pool.string_at(string), Some("world"));
        assert_eq!(pool.utf8_at(string), None);
        assert_eq!(pool.name_and_type_at(nat), Some(("run", "()V")));
        assert_eq!(pool.method_handle_at(handle), Some((6, string)));
        let (bootstrap, signature) = pool.invoke_dynamic_at(indy).unwrap();
        assert_eq!(bootstrap, 0);
        assert_eq!(signature.result_kind, Kind::Reference);
        assert!(pool.signature_at(indy).is_some());
        assert_eq!(pool.integer_at(utf8), None);
    }

    #[test]
    fn word_classes_classified() {
        struct Words;
        impl TypeClassifier for Words {
            fn is_word_class(&self, name: &str) -> bool {
                name == "runtime/Pointer"
            }
        }
        let mut pool = ConstantsPool::new();
        let pointer = pool.add_class("runtime/Pointer", &Words);
        let pointer_array = pool.add_class("[Lruntime/Pointer;", &Words);
        assert_eq!(pool.class_at(pointer).unwrap().kind, Kind::Word);
        assert_eq!(pool.class_at(pointer_array).unwrap().kind, Kind::Reference);
    }
}
