use std::borrow::Cow;
use std::fmt::{Debug, Error as FmtError, Formatter};

/// Names of methods, fields
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Names of classes and interfaces
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BinaryName(Cow<'static, str>);

pub trait Name: Sized {
    /// Check if a string would be a valid name
    fn check_valid(name: impl AsRef<str>) -> Result<(), String>;

    /// Extact the raw underlying string data:
    fn as_cow(&self) -> &Cow<'static, str>;

    /// Extact the raw underlying string name
    fn as_str(&self) -> &str {
        self.as_cow().as_ref()
    }

    /// Try to construct a name from a string
    fn from_string(name: String) -> Result<Self, String>;
}

impl Name for UnqualifiedName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.contains(&['.', ';', '[', '/'][..]) {
            Err(format!(
                "Unqualified name '{}' contains an illegal character",
                name
            ))
        } else if name.is_empty() {
            Err(format!("Unqualified name '{}' is empty", name))
        } else {
            Ok(())
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(UnqualifiedName(Cow::Owned(name)))
    }
}

impl Name for BinaryName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.is_empty() {
            Err(format!("Binary name '{}' is empty", name))
        } else {
            name.split('/').map(UnqualifiedName::check_valid).collect()
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        Self::check_valid(&name)?;
        Ok(BinaryName(Cow::Owned(name)))
    }
}

impl Debug for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl UnqualifiedName {
    const fn name(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    // Only special names may contain angle brackets
    pub const INIT: Self = Self::name("<init>");

    // JDK names
    pub const ABS: Self = Self::name("abs");
    pub const BITCOUNT: Self = Self::name("bitCount");
    pub const GETCLASS: Self = Self::name("getClass");
    pub const INVOKE: Self = Self::name("invoke");
    pub const INVOKEEXACT: Self = Self::name("invokeExact");
    pub const MAX: Self = Self::name("max");
    pub const MIN: Self = Self::name("min");
    pub const NUMBEROFLEADINGZEROS: Self = Self::name("numberOfLeadingZeros");
    pub const REVERSEBYTES: Self = Self::name("reverseBytes");
    pub const SQRT: Self = Self::name("sqrt");

    // Final methods on `java/lang/Object`
    pub const NOTIFY: Self = Self::name("notify");
    pub const NOTIFYALL: Self = Self::name("notifyAll");
    pub const WAIT: Self = Self::name("wait");

    // Archetype and thunk macros
    pub const DROPFIRSTN: Self = Self::name("dropFirstN");
    pub const FIRSTN: Self = Self::name("firstN");
    pub const ISCUSTOMTHUNK: Self = Self::name("isCustomThunk");
    pub const ISSHAREABLETHUNK: Self = Self::name("isShareableThunk");
    pub const LASTN: Self = Self::name("lastN");
    pub const NUMARGUMENTS: Self = Self::name("numArguments");
    pub const PLACEHOLDER: Self = Self::name("placeholder");
}

impl BinaryName {
    const fn name(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    /// Prefix shared by every generated lambda form class
    pub const LAMBDAFORM_PREFIX: &'static str = "java/lang/invoke/LambdaForm$";

    // Standard library classes
    pub const CLASS: Self = Self::name("java/lang/Class");
    pub const INTEGER: Self = Self::name("java/lang/Integer");
    pub const LONG: Self = Self::name("java/lang/Long");
    pub const MATH: Self = Self::name("java/lang/Math");
    pub const OBJECT: Self = Self::name("java/lang/Object");
    pub const STRICTMATH: Self = Self::name("java/lang/StrictMath");

    // Method handle machinery
    pub const ILGENMACROS: Self = Self::name("java/lang/invoke/ILGenMacros");
    pub const METHODHANDLE: Self = Self::name("java/lang/invoke/MethodHandle");

    /// Whether this is one of the generated `LambdaForm$...` classes
    pub fn is_lambda_form(&self) -> bool {
        self.as_str().starts_with(Self::LAMBDAFORM_PREFIX)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validation() {
        assert!(BinaryName::from_string("java/lang/Object".to_owned()).is_ok());
        assert!(BinaryName::from_string("java//Object".to_owned()).is_err());
        assert!(UnqualifiedName::from_string("a.b".to_owned()).is_err());
        assert!(UnqualifiedName::from_string(String::new()).is_err());
    }

    #[test]
    fn lambda_forms() {
        let name = BinaryName::from_string("java/lang/invoke/LambdaForm$MH".to_owned()).unwrap();
        assert!(name.is_lambda_form());
        assert!(!BinaryName::METHODHANDLE.is_lambda_form());
    }
}
