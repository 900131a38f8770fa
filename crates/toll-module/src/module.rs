//! Structured representation of a wasm binary module.
//!
//! A [`Module`] is an ordered list of [`Section`]s.  Decoding preserves the
//! order found in the input; [`Module::insert_section`] places a newly
//! created section at its canonical rank so that re-encoding after a
//! transformation still produces a well-ordered module.
//!
//! Cross-references between sections are positional.  Each index space gets
//! its own newtype ([`TypeIndex`], [`FuncIndex`], [`GlobalIndex`]) so a
//! function index cannot be handed to code expecting a global index.

use crate::opcode::{Op, TypeCode};

// ── Index newtypes ───────────────────────────────────────────────────────────

/// Index into the type section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeIndex(pub u32);

/// Index into the function index space (imports first, then defined
/// functions in function-section order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FuncIndex(pub u32);

/// Index into the global index space (imports first, then defined globals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GlobalIndex(pub u32);

// ── Section ids ──────────────────────────────────────────────────────────────

/// Section kind, identified on the wire by a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionId {
    Custom,
    Type,
    Import,
    Function,
    Table,
    Memory,
    Global,
    Export,
    Start,
    Element,
    Code,
    Data,
    DataCount,
}

impl SectionId {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Custom),
            1 => Some(Self::Type),
            2 => Some(Self::Import),
            3 => Some(Self::Function),
            4 => Some(Self::Table),
            5 => Some(Self::Memory),
            6 => Some(Self::Global),
            7 => Some(Self::Export),
            8 => Some(Self::Start),
            9 => Some(Self::Element),
            10 => Some(Self::Code),
            11 => Some(Self::Data),
            12 => Some(Self::DataCount),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Self::Custom => 0,
            Self::Type => 1,
            Self::Import => 2,
            Self::Function => 3,
            Self::Table => 4,
            Self::Memory => 5,
            Self::Global => 6,
            Self::Export => 7,
            Self::Start => 8,
            Self::Element => 9,
            Self::Code => 10,
            Self::Data => 11,
            Self::DataCount => 12,
        }
    }

    /// Canonical position of this section kind within a module.  Custom
    /// sections carry no rank; they stay wherever they were found.  The
    /// order follows the wire ids except for datacount, which precedes
    /// the code section despite its higher id.
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Custom => None,
            Self::Type => Some(1),
            Self::Import => Some(2),
            Self::Function => Some(3),
            Self::Table => Some(4),
            Self::Memory => Some(5),
            Self::Global => Some(6),
            Self::Export => Some(7),
            Self::Start => Some(8),
            Self::Element => Some(9),
            Self::DataCount => Some(10),
            Self::Code => Some(11),
            Self::Data => Some(12),
        }
    }
}

// ── Entries ──────────────────────────────────────────────────────────────────

/// A function signature from the type section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    pub params: Vec<TypeCode>,
    pub return_type: Option<TypeCode>,
}

/// External kind of an import or export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Function,
    Table,
    Memory,
    Global,
}

impl ExternalKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Function),
            1 => Some(Self::Table),
            2 => Some(Self::Memory),
            3 => Some(Self::Global),
            _ => None,
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Self::Function => 0,
            Self::Table => 1,
            Self::Memory => 2,
            Self::Global => 3,
        }
    }
}

/// Growth limits for a memory or table.  `maximum` is present iff
/// `flags == 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizableLimits {
    pub flags: u32,
    pub initial: u32,
    pub maximum: Option<u32>,
}

impl ResizableLimits {
    /// Force a growth ceiling of `max_pages`, discarding any previous
    /// maximum.  Idempotent.
    pub fn bound(&mut self, max_pages: u32) {
        self.flags = 1;
        self.maximum = Some(max_pages);
    }
}

/// A table declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableType {
    pub element_type: TypeCode,
    pub limits: ResizableLimits,
}

/// Type of a global variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalType {
    pub content_type: TypeCode,
    pub mutable: bool,
}

/// A defined global: type plus constant initializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalEntry {
    pub ty: GlobalType,
    pub init: Op,
}

/// Kind-specific type descriptor of an import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDescriptor {
    Function(TypeIndex),
    Table(TableType),
    Memory(ResizableLimits),
    Global(GlobalType),
}

impl ImportDescriptor {
    pub fn kind(&self) -> ExternalKind {
        match self {
            Self::Function(_) => ExternalKind::Function,
            Self::Table(_) => ExternalKind::Table,
            Self::Memory(_) => ExternalKind::Memory,
            Self::Global(_) => ExternalKind::Global,
        }
    }
}

/// One import-section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    pub module: String,
    pub field: String,
    pub descriptor: ImportDescriptor,
}

/// One export-section entry.  `index` lives in the index space named by
/// `kind` (imports counted first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub field: String,
    pub kind: ExternalKind,
    pub index: u32,
}

/// One element segment: function indices placed into a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementEntry {
    pub table: u32,
    pub offset: Op,
    pub elements: Vec<FuncIndex>,
}

/// A run of locals of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub count: u32,
    pub ty: TypeCode,
}

/// One function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEntry {
    pub locals: Vec<LocalEntry>,
    pub code: Vec<Op>,
}

/// One data segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntry {
    pub memory: u32,
    pub offset: Op,
    pub data: Vec<u8>,
}

/// An uninterpreted custom section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSection {
    pub name: String,
    pub payload: Vec<u8>,
}

// ── Sections ─────────────────────────────────────────────────────────────────

/// One section of a module, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Section {
    Custom(CustomSection),
    Type(Vec<FuncType>),
    Import(Vec<ImportEntry>),
    Function(Vec<TypeIndex>),
    Table(Vec<TableType>),
    Memory(Vec<ResizableLimits>),
    Global(Vec<GlobalEntry>),
    Export(Vec<ExportEntry>),
    Start(FuncIndex),
    Element(Vec<ElementEntry>),
    Code(Vec<CodeEntry>),
    Data(Vec<DataEntry>),
    DataCount(u32),
}

impl Section {
    pub fn id(&self) -> SectionId {
        match self {
            Self::Custom(_) => SectionId::Custom,
            Self::Type(_) => SectionId::Type,
            Self::Import(_) => SectionId::Import,
            Self::Function(_) => SectionId::Function,
            Self::Table(_) => SectionId::Table,
            Self::Memory(_) => SectionId::Memory,
            Self::Global(_) => SectionId::Global,
            Self::Export(_) => SectionId::Export,
            Self::Start(_) => SectionId::Start,
            Self::Element(_) => SectionId::Element,
            Self::Code(_) => SectionId::Code,
            Self::Data(_) => SectionId::Data,
            Self::DataCount(_) => SectionId::DataCount,
        }
    }
}

// ── Module ───────────────────────────────────────────────────────────────────

/// A decoded module: the preamble (implicit, checked on decode and
/// re-emitted on encode) followed by sections in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    pub sections: Vec<Section>,
}

impl Module {
    /// Find the first section of the given kind.
    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.iter().find(|s| s.id() == id)
    }

    /// Find the first section of the given kind, mutably.
    pub fn section_mut(&mut self, id: SectionId) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.id() == id)
    }

    /// True if a section of the given kind exists.
    pub fn has_section(&self, id: SectionId) -> bool {
        self.section(id).is_some()
    }

    /// Insert `section` at its canonical rank: before the first section
    /// whose rank exceeds it.  Custom sections are skipped during the
    /// comparison, and a section that ranks above everything present is
    /// appended.
    pub fn insert_section(&mut self, section: Section) {
        let rank = section
            .id()
            .rank()
            .expect("custom sections have no canonical position");
        let at = self
            .sections
            .iter()
            .position(|s| matches!(s.id().rank(), Some(r) if r > rank))
            .unwrap_or(self.sections.len());
        self.sections.insert(at, section);
    }

    /// Number of imports of the given kind, i.e. the base of the defined
    /// part of that kind's index space.
    pub fn import_count(&self, kind: ExternalKind) -> u32 {
        match self.section(SectionId::Import) {
            Some(Section::Import(entries)) => entries
                .iter()
                .filter(|e| e.descriptor.kind() == kind)
                .count() as u32,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_section_respects_canonical_order() {
        let mut module = Module {
            sections: vec![
                Section::Type(vec![]),
                Section::Function(vec![]),
                Section::Code(vec![]),
            ],
        };
        module.insert_section(Section::Import(vec![]));
        let ids: Vec<SectionId> = module.sections.iter().map(Section::id).collect();
        assert_eq!(
            ids,
            vec![
                SectionId::Type,
                SectionId::Import,
                SectionId::Function,
                SectionId::Code,
            ]
        );
    }

    #[test]
    fn datacount_ranks_between_element_and_code() {
        let mut module = Module {
            sections: vec![
                Section::Element(vec![]),
                Section::Code(vec![]),
                Section::Data(vec![]),
            ],
        };
        module.insert_section(Section::DataCount(1));
        let ids: Vec<SectionId> = module.sections.iter().map(Section::id).collect();
        assert_eq!(
            ids,
            vec![
                SectionId::Element,
                SectionId::DataCount,
                SectionId::Code,
                SectionId::Data,
            ]
        );
    }

    #[test]
    fn insert_section_appends_when_highest_ranked() {
        let mut module = Module {
            sections: vec![Section::Type(vec![])],
        };
        module.insert_section(Section::Export(vec![]));
        assert_eq!(module.sections.last().map(Section::id), Some(SectionId::Export));
    }

    #[test]
    fn insert_section_skips_custom_sections() {
        let mut module = Module {
            sections: vec![
                Section::Custom(CustomSection {
                    name: "notes".into(),
                    payload: vec![],
                }),
                Section::Export(vec![]),
            ],
        };
        module.insert_section(Section::Global(vec![]));
        let ids: Vec<SectionId> = module.sections.iter().map(Section::id).collect();
        assert_eq!(
            ids,
            vec![SectionId::Custom, SectionId::Global, SectionId::Export]
        );
    }

    #[test]
    fn import_count_filters_by_kind() {
        let module = Module {
            sections: vec![Section::Import(vec![
                ImportEntry {
                    module: "env".into(),
                    field: "f".into(),
                    descriptor: ImportDescriptor::Function(TypeIndex(0)),
                },
                ImportEntry {
                    module: "env".into(),
                    field: "mem".into(),
                    descriptor: ImportDescriptor::Memory(ResizableLimits {
                        flags: 0,
                        initial: 1,
                        maximum: None,
                    }),
                },
            ])],
        };
        assert_eq!(module.import_count(ExternalKind::Function), 1);
        assert_eq!(module.import_count(ExternalKind::Memory), 1);
        assert_eq!(module.import_count(ExternalKind::Global), 0);
    }

    #[test]
    fn bound_is_idempotent() {
        let mut limits = ResizableLimits {
            flags: 0,
            initial: 1,
            maximum: None,
        };
        limits.bound(5);
        let once = limits.clone();
        limits.bound(5);
        assert_eq!(limits, once);
        assert_eq!(limits.flags, 1);
        assert_eq!(limits.maximum, Some(5));
    }
}
