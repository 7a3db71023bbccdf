use crate::jvm::class_file::{ExceptionHandler, StackMapTable};
use crate::jvm::{Kind, MethodAccessFlags, MethodDescriptor, ParseDescriptor, TypeClassifier};
use std::io::Result;

/// Body of a method, mirroring the `Code` attribute
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytecode: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub stack_map_table: StackMapTable,
}

/// Method, with its signature's kinds resolved once at construction
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name: String,
    pub descriptor: MethodDescriptor<String>,
    pub parameter_kinds: Vec<Kind>,
    pub result_kind: Kind,

    /// Whether the declaring class is a word type, which makes the receiver
    /// slot of an instance method a word instead of a reference
    pub holder_is_word: bool,

    pub code: Code,
}

impl Method {
    pub fn new(
        access_flags: MethodAccessFlags,
        holder: &str,
        name: impl Into<String>,
        descriptor: &str,
        code: Code,
        classifier: &dyn TypeClassifier,
    ) -> Result<Method> {
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
        Ok(Method {
            access_flags,
            name: name.into(),
            descriptor,
            parameter_kinds,
            result_kind,
            holder_is_word: classifier.is_word_class(holder),
            code,
        })
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::NoWordTypes;

    #[test]
    fn signature_kinds_resolved() {
        let code = Code {
            max_stack: 0,
            max_locals: 3,
            bytecode: vec![crate::jvm::opcodes::RETURN],
            exception_table: vec![],
            stack_map_table: StackMapTable::default(),
        };
        let method = Method::new(
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            "pkg/Example",
            "run",
            "(Ljava/lang/String;J)V",
            code,
            &NoWordTypes,
        )
        .unwrap();
        assert!(method.is_static());
        assert_eq!(method.parameter_kinds, vec![Kind::Reference, Kind::Long]);
        assert_eq!(method.result_kind, Kind::Void);
        assert!(!method.holder_is_word);
    }
}
