//! The type model shared by the parser, the compiler and the decoder.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    Universal,
    Application,
    Context,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    pub class: Class,
    pub number: u32,
}

impl Tag {
    pub const BOOLEAN: Tag = Tag::universal(1);
    pub const INTEGER: Tag = Tag::universal(2);
    pub const BIT_STRING: Tag = Tag::universal(3);
    pub const OCTET_STRING: Tag = Tag::universal(4);
    pub const NULL: Tag = Tag::universal(5);
    pub const OBJECT_IDENTIFIER: Tag = Tag::universal(6);
    pub const ENUMERATED: Tag = Tag::universal(10);
    pub const SEQUENCE: Tag = Tag::universal(16);
    pub const SET: Tag = Tag::universal(17);

    pub const fn universal(number: u32) -> Self {
        Tag {
            class: Class::Universal,
            number,
        }
    }

    pub const fn context(number: u32) -> Self {
        Tag {
            class: Class::Context,
            number,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            Class::Universal => write!(f, "[UNIVERSAL {}]", self.number),
            Class::Application => write!(f, "[APPLICATION {}]", self.number),
            Class::Context => write!(f, "[{}]", self.number),
            Class::Private => write!(f, "[PRIVATE {}]", self.number),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMode {
    Implicit,
    Explicit,
    /// Neither keyword was written; the compiler resolves it from the module
    /// tagging environment.
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggingDefault {
    Explicit,
    Implicit,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    Utf8,
    Numeric,
    Printable,
    Teletex,
    Videotex,
    Ia5,
    Graphic,
    Visible,
    General,
    Universal,
    Bmp,
}

impl StringKind {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "UTF8String" => StringKind::Utf8,
            "NumericString" => StringKind::Numeric,
            "PrintableString" => StringKind::Printable,
            "TeletexString" | "T61String" => StringKind::Teletex,
            "VideotexString" => StringKind::Videotex,
            "IA5String" => StringKind::Ia5,
            "GraphicString" => StringKind::Graphic,
            "VisibleString" | "ISO646String" => StringKind::Visible,
            "GeneralString" => StringKind::General,
            "UniversalString" => StringKind::Universal,
            "BMPString" => StringKind::Bmp,
            _ => return None,
        })
    }

    pub fn tag(self) -> Tag {
        Tag::universal(match self {
            StringKind::Utf8 => 12,
            StringKind::Numeric => 18,
            StringKind::Printable => 19,
            StringKind::Teletex => 20,
            StringKind::Videotex => 21,
            StringKind::Ia5 => 22,
            StringKind::Graphic => 25,
            StringKind::Visible => 26,
            StringKind::General => 27,
            StringKind::Universal => 28,
            StringKind::Bmp => 30,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeKind {
    Utc,
    Generalized,
}

impl TimeKind {
    pub fn tag(self) -> Tag {
        match self {
            TimeKind::Utc => Tag::universal(23),
            TimeKind::Generalized => Tag::universal(24),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Boolean(bool),
    Integer(i128),
    Identifier(String),
    Null,
    /// A default we parse past but can't materialize (strings, braces)
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    Required,
    Optional,
    Default(DefaultValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub name: String,
    pub ty: Type,
    pub presence: Presence,
}

impl Component {
    pub(crate) fn as_pair(&self) -> (&str, &Type) {
        (&self.name, &self.ty)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub name: String,
    pub ty: Type,
}

impl Alternative {
    pub(crate) fn as_pair(&self) -> (&str, &Type) {
        (&self.name, &self.ty)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Components {
    pub components: Vec<Component>,
    pub extensible: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Alternatives {
    pub alternatives: Vec<Alternative>,
    pub extensible: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Enumeration {
    pub items: Vec<(String, i128)>,
    pub extensible: bool,
}

impl Enumeration {
    pub fn label(&self, value: i128) -> Option<&str> {
        self.items
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Boolean,
    Null,
    Integer,
    Enumerated(Enumeration),
    OctetString,
    BitString,
    ObjectIdentifier,
    CharString(StringKind),
    Time(TimeKind),
    Sequence(Components),
    Set(Components),
    SequenceOf(Box<Type>),
    SetOf(Box<Type>),
    Choice(Alternatives),
    Any,
    Reference(String),
    Tagged {
        tag: Tag,
        mode: TagMode,
        inner: Box<Type>,
    },
}

impl Type {
    /// The universal tag of a builtin type, `None` for types whose tag
    /// depends on something else (CHOICE, ANY, references, tagged types).
    pub fn universal_tag(&self) -> Option<Tag> {
        Some(match self {
            Type::Boolean => Tag::BOOLEAN,
            Type::Null => Tag::NULL,
            Type::Integer => Tag::INTEGER,
            Type::Enumerated(_) => Tag::ENUMERATED,
            Type::OctetString => Tag::OCTET_STRING,
            Type::BitString => Tag::BIT_STRING,
            Type::ObjectIdentifier => Tag::OBJECT_IDENTIFIER,
            Type::CharString(kind) => kind.tag(),
            Type::Time(kind) => kind.tag(),
            Type::Sequence(_) | Type::SequenceOf(_) => Tag::SEQUENCE,
            Type::Set(_) | Type::SetOf(_) => Tag::SET,
            Type::Choice(_) | Type::Any | Type::Reference(_) | Type::Tagged { .. } => return None,
        })
    }

    pub fn describe(&self) -> String {
        match self {
            Type::Boolean => "BOOLEAN".to_string(),
            Type::Null => "NULL".to_string(),
            Type::Integer => "INTEGER".to_string(),
            Type::Enumerated(_) => "ENUMERATED".to_string(),
            Type::OctetString => "OCTET STRING".to_string(),
            Type::BitString => "BIT STRING".to_string(),
            Type::ObjectIdentifier => "OBJECT IDENTIFIER".to_string(),
            Type::CharString(kind) => format!("{kind:?}String"),
            Type::Time(TimeKind::Utc) => "UTCTime".to_string(),
            Type::Time(TimeKind::Generalized) => "GeneralizedTime".to_string(),
            Type::Sequence(_) => "SEQUENCE".to_string(),
            Type::Set(_) => "SET".to_string(),
            Type::SequenceOf(_) => "SEQUENCE OF".to_string(),
            Type::SetOf(_) => "SET OF".to_string(),
            Type::Choice(_) => "CHOICE".to_string(),
            Type::Any => "ANY".to_string(),
            Type::Reference(name) => name.clone(),
            Type::Tagged { tag, inner, .. } => format!("{tag} {}", inner.describe()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub name: String,
    pub ty: Type,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub tagging: TaggingDefault,
    pub assignments: Vec<Assignment>,
}
