use crate::binder::bind;
use crate::engine::{analyze, Analysis, CancellationToken};
use crate::graph::{NodeId, NullType};
use crate::parse::parse_compilation;
use crate::rewrite::{make_all_reference_types_nullable, render};
use crate::syntax::{Compilation, FieldDecl, MethodDecl};

/// Parse, normalise, bind and analyse a single source file.
pub(crate) fn analyze_source(source: &str) -> AnalyzedProgram {
    analyze_sources(&[("test.cs", source)])
}

/// Same, for a multi-unit compilation.
pub(crate) fn analyze_sources(sources: &[(&str, &str)]) -> AnalyzedProgram {
    let compilation = parse_compilation(sources).expect("parse sources");
    let compilation = make_all_reference_types_nullable(&compilation);
    let model = bind(&compilation);
    let analysis =
        analyze(&compilation, &model, &CancellationToken::default()).expect("run analysis");
    AnalyzedProgram {
        compilation,
        analysis,
    }
}

/// An analysed compilation plus lookup helpers for assertions.
pub(crate) struct AnalyzedProgram {
    pub(crate) compilation: Compilation,
    pub(crate) analysis: Analysis,
}

impl AnalyzedProgram {
    fn find_method(&self, class: &str, method: &str) -> (usize, &MethodDecl) {
        for (unit, tu) in self.compilation.units.iter().enumerate() {
            for candidate in &tu.classes {
                if candidate.name != class {
                    continue;
                }
                for m in &candidate.methods {
                    if m.name == method {
                        return (unit, m);
                    }
                }
            }
        }
        panic!("method {class}.{method} not found");
    }

    fn find_field(&self, class: &str, field: &str) -> (usize, &FieldDecl) {
        for (unit, tu) in self.compilation.units.iter().enumerate() {
            for candidate in &tu.classes {
                if candidate.name != class {
                    continue;
                }
                for f in &candidate.fields {
                    if f.name == field {
                        return (unit, f);
                    }
                }
            }
        }
        panic!("field {class}.{field} not found");
    }

    pub(crate) fn param_label(&self, class: &str, method: &str, index: usize) -> NullType {
        let (unit, m) = self.find_method(class, method);
        self.analysis
            .null_type_for_syntax(unit, m.params[index].ty.id)
            .expect("parameter has a node")
    }

    pub(crate) fn return_label(&self, class: &str, method: &str) -> NullType {
        let (unit, m) = self.find_method(class, method);
        self.analysis
            .null_type_for_syntax(unit, m.return_type.id)
            .expect("return type has a node")
    }

    pub(crate) fn field_label(&self, class: &str, field: &str) -> NullType {
        let (unit, f) = self.find_field(class, field);
        self.analysis
            .null_type_for_syntax(unit, f.ty.id)
            .expect("field type has a node")
    }

    pub(crate) fn param_node(&self, class: &str, method: &str, index: usize) -> NodeId {
        let (unit, m) = self.find_method(class, method);
        self.analysis
            .type_system()
            .node_for_syntax(unit, m.params[index].ty.id)
            .expect("parameter has a node")
    }

    pub(crate) fn return_node(&self, class: &str, method: &str) -> NodeId {
        let (unit, m) = self.find_method(class, method);
        self.analysis
            .type_system()
            .node_for_syntax(unit, m.return_type.id)
            .expect("return type has a node")
    }

    /// The annotated program, rendered unit by unit.
    pub(crate) fn emitted(&self) -> String {
        self.analysis
            .emit(&self.compilation)
            .iter()
            .map(render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
