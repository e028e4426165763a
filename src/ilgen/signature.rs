//! Signatures of calls whose argument lists were rewritten by placeholder expansion
//!
//! A call in an archetype specimen may pass a placeholder (one `int` argument standing for a
//! whole list of arguments). Once the placeholder is expanded into the call's children, the
//! call's signature has to change accordingly. The signature is kept as a list of types while it
//! is being edited, and only turned into a descriptor string when it is printed.

use crate::jvm::{FieldType, MethodDescriptor, RenderDescriptor};
use std::ops::Range;

/// Parameter and return types of a call, open for editing
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ArtificialSignature {
    pub parameters: Vec<FieldType>,
    pub return_type: Option<FieldType>,
}

impl ArtificialSignature {
    pub fn new(parameters: Vec<FieldType>, return_type: Option<FieldType>) -> ArtificialSignature {
        ArtificialSignature {
            parameters,
            return_type,
        }
    }

    pub fn from_descriptor(descriptor: &MethodDescriptor) -> ArtificialSignature {
        ArtificialSignature::new(descriptor.parameters.clone(), descriptor.return_type.clone())
    }

    /// Replace the parameter at `index` by a list of parameters
    ///
    /// Out of range indices leave the signature unchanged.
    pub fn splice(mut self, index: usize, replacement: &[FieldType]) -> ArtificialSignature {
        if index < self.parameters.len() {
            self.parameters
                .splice(index..index + 1, replacement.iter().cloned());
        }
        self
    }

    /// Keep only the parameters in `range` (clamped to the parameter list)
    pub fn slice(mut self, range: Range<usize>) -> ArtificialSignature {
        let end = range.end.min(self.parameters.len());
        let start = range.start.min(end);
        self.parameters = self.parameters[start..end].to_vec();
        self
    }

    /// Append the parameters of another signature (its return type is ignored)
    pub fn concat(mut self, other: &ArtificialSignature) -> ArtificialSignature {
        self.parameters.extend(other.parameters.iter().cloned());
        self
    }

    pub fn first_n(self, n: usize) -> ArtificialSignature {
        self.slice(0..n)
    }

    pub fn drop_first_n(self, n: usize) -> ArtificialSignature {
        let len = self.parameters.len();
        self.slice(n..len)
    }

    pub fn last_n(self, n: usize) -> ArtificialSignature {
        let len = self.parameters.len();
        self.slice(len.saturating_sub(n)..len)
    }

    pub fn with_return_type(mut self, return_type: Option<FieldType>) -> ArtificialSignature {
        self.return_type = return_type;
        self
    }

    pub fn to_descriptor(&self) -> MethodDescriptor {
        MethodDescriptor {
            parameters: self.parameters.clone(),
            return_type: self.return_type.clone(),
        }
    }
}

impl From<&MethodDescriptor> for ArtificialSignature {
    fn from(descriptor: &MethodDescriptor) -> ArtificialSignature {
        ArtificialSignature::from_descriptor(descriptor)
    }
}

impl RenderDescriptor for ArtificialSignature {
    fn render_to(&self, write_to: &mut String) {
        self.to_descriptor().render_to(write_to)
    }
}
