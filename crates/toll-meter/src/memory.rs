//! Memory growth-limit rewriting.

use toll_module::{ImportDescriptor, Module, Section};

/// Clamp every memory declared or imported by `module` to at most
/// `max_pages` pages, discarding any previously declared maximum.
///
/// Idempotent, and touches no index space, so it runs before metering
/// injection.
pub fn apply_memory_limit(module: &mut Module, max_pages: u32) {
    for section in &mut module.sections {
        match section {
            Section::Memory(entries) => {
                for limits in entries {
                    limits.bound(max_pages);
                }
            }
            Section::Import(entries) => {
                for entry in entries {
                    if let ImportDescriptor::Memory(limits) = &mut entry.descriptor {
                        limits.bound(max_pages);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toll_module::{ImportEntry, ResizableLimits, SectionId};

    fn unbounded() -> ResizableLimits {
        ResizableLimits {
            flags: 0,
            initial: 1,
            maximum: None,
        }
    }

    #[test]
    fn bounds_defined_memories() {
        let mut module = Module {
            sections: vec![Section::Memory(vec![unbounded()])],
        };
        apply_memory_limit(&mut module, 5);
        let Some(Section::Memory(entries)) = module.section(SectionId::Memory) else {
            panic!("missing memory section");
        };
        assert_eq!(
            entries[0],
            ResizableLimits {
                flags: 1,
                initial: 1,
                maximum: Some(5),
            }
        );
    }

    #[test]
    fn bounds_imported_memories() {
        let mut module = Module {
            sections: vec![Section::Import(vec![ImportEntry {
                module: "env".into(),
                field: "memory".into(),
                descriptor: ImportDescriptor::Memory(unbounded()),
            }])],
        };
        apply_memory_limit(&mut module, 8);
        let Some(Section::Import(entries)) = module.section(SectionId::Import) else {
            panic!("missing import section");
        };
        assert_eq!(
            entries[0].descriptor,
            ImportDescriptor::Memory(ResizableLimits {
                flags: 1,
                initial: 1,
                maximum: Some(8),
            })
        );
    }

    #[test]
    fn reapplying_is_a_no_op() {
        let mut module = Module {
            sections: vec![Section::Memory(vec![unbounded()])],
        };
        apply_memory_limit(&mut module, 5);
        let once = module.clone();
        apply_memory_limit(&mut module, 5);
        assert_eq!(module, once);
    }

    #[test]
    fn discards_smaller_declared_maximum() {
        let mut module = Module {
            sections: vec![Section::Memory(vec![ResizableLimits {
                flags: 1,
                initial: 1,
                maximum: Some(2),
            }])],
        };
        apply_memory_limit(&mut module, 200);
        let Some(Section::Memory(entries)) = module.section(SectionId::Memory) else {
            panic!("missing memory section");
        };
        assert_eq!(entries[0].maximum, Some(200));
    }
}
