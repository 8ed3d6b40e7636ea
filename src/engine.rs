use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::diagnostics::{collect_diagnostics, Diagnostic};
use crate::edge_builder::build_edges;
use crate::graph::{NullType, TypeSystem};
use crate::maxflow::compute_max_flow;
use crate::node_builder::build_nodes;
use crate::propagate::assign_labels;
use crate::rewrite::rewrite_with_annotations;
use crate::semantic::SemanticModel;
use crate::syntax::{Compilation, SyntaxId, TranslationUnit};

/// Cooperative cancellation flag shared between the caller and the engine.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Cancelled.into())
        } else {
            Ok(())
        }
    }
}

/// Error value carried through `anyhow` when analysis is cancelled. A
/// cancelled engine holds no partial output; callers retry on a fresh one.
#[derive(Clone, Copy, Debug)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("analysis cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Completed inference: the labelled graph plus surfaced warnings.
#[derive(Debug)]
pub struct Analysis {
    type_system: TypeSystem,
    diagnostics: Vec<Diagnostic>,
}

impl Analysis {
    pub fn type_system(&self) -> &TypeSystem {
        &self.type_system
    }

    /// Places where a user-asserted non-null context sees inferred null flow.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// The same warnings rendered as SARIF results.
    pub fn sarif_results(&self) -> Vec<serde_sarif::sarif::Result> {
        crate::diagnostics::to_sarif_results(&self.diagnostics)
    }

    /// The inferred label of a type-bearing syntax node, if one was mapped.
    pub fn null_type_for_syntax(&self, unit: usize, syntax: SyntaxId) -> Option<NullType> {
        let node = self.type_system.node_for_syntax(unit, syntax)?;
        Some(self.type_system.node(node).null_type)
    }

    /// Rewrite every unit so its annotations match the inferred labels.
    pub fn emit(&self, compilation: &Compilation) -> Vec<TranslationUnit> {
        compilation
            .units
            .iter()
            .enumerate()
            .map(|(unit, tu)| rewrite_with_annotations(unit, tu, &self.type_system))
            .collect()
    }
}

/// Run the full pipeline: node building per unit in parallel, edge building
/// per unit in parallel, then the flow solver and label propagation.
///
/// Both builder passes accumulate into unit-local buffers and publish once,
/// in unit order, so output is deterministic regardless of scheduling.
pub fn analyze(
    compilation: &Compilation,
    model: &SemanticModel,
    cancellation: &CancellationToken,
) -> Result<Analysis> {
    let started = Instant::now();
    let mut type_system = TypeSystem::new(compilation.units.len());

    let built = compilation
        .units
        .par_iter()
        .enumerate()
        .map(|(unit, tu)| {
            cancellation.check()?;
            Ok(build_nodes(unit, tu, model))
        })
        .collect::<Result<Vec<_>>>()?;
    for builder in built {
        type_system.merge_nodes(builder);
    }
    type_system.synthesize_external_symbols(model);
    debug!(nodes = type_system.node_count(), "node graph published");

    let pending = compilation
        .units
        .par_iter()
        .enumerate()
        .map(|(unit, tu)| {
            cancellation.check()?;
            Ok(build_edges(unit, tu, model, &type_system))
        })
        .collect::<Result<Vec<_>>>()?;
    for edges in pending {
        type_system.merge_edges(edges);
    }
    debug!(edges = type_system.edge_count(), "edge graph published");

    let flow = compute_max_flow(&mut type_system, cancellation)?;
    assign_labels(&mut type_system, cancellation)?;

    let diagnostics = collect_diagnostics(&type_system, compilation);
    info!(
        units = compilation.units.len(),
        nodes = type_system.node_count(),
        edges = type_system.edge_count(),
        flow,
        warnings = diagnostics.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "nullability analysis finished"
    );

    Ok(Analysis {
        type_system,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use crate::parse::parse_compilation;
    use crate::syntax::CONSTRUCTOR_NAME;
    use crate::test_harness::{analyze_source, analyze_sources};

    #[test]
    fn value_only_programs_add_no_inferrable_nodes() {
        let program = analyze_source("class C { static int Add(int a, int b) => a; }");
        // The oblivious singleton and the two sinks always exist.
        assert_eq!(program.analysis.type_system().node_count(), 3);
        assert!(program.analysis.diagnostics().is_empty());
    }

    #[test]
    fn cancelled_before_start_produces_no_output() {
        let compilation =
            parse_compilation(&[("test.cs", "class C { static string Id(string x) => x; }")])
                .expect("parse");
        let model = bind(&compilation);
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let err = analyze(&compilation, &model, &cancellation).expect_err("cancelled");
        assert!(err.downcast_ref::<Cancelled>().is_some());
    }

    #[test]
    fn analysis_is_deterministic_across_runs() {
        let source = "class C { string? f; public C(string? s) { f = s; } string? G() => f; \
             static int Use(string? s) => s.Length; }";
        let first = analyze_source(source);
        let second = analyze_source(source);
        assert_eq!(first.emitted(), second.emitted());
        assert_eq!(
            first.analysis.diagnostics().len(),
            second.analysis.diagnostics().len()
        );
    }

    #[test]
    fn cross_unit_null_flow_reaches_the_declaring_unit() {
        let program = analyze_sources(&[
            ("lib.cs", "class Lib { static void Log(string message) { } }"),
            ("app.cs", "class App { static void Main() { Lib.Log(null); } }"),
        ]);
        assert_eq!(program.param_label("Lib", "Log", 0), NullType::Nullable);
    }

    #[test]
    fn identity_passthrough_keeps_parameter_and_return_nullable() {
        let program = analyze_source("class Program { static string? Test(string? x) => x; }");
        assert_eq!(program.param_label("Program", "Test", 0), NullType::Nullable);
        assert_eq!(program.return_label("Program", "Test"), NullType::Nullable);
        let param = program.param_node("Program", "Test", 0);
        let ret = program.return_node("Program", "Test");
        assert!(program.analysis.type_system().path_exists(param, ret));
    }

    #[test]
    fn coalesce_guard_makes_the_return_non_null() {
        let program =
            analyze_source("class Program { static string? Test(string? x) => x ?? \"\"; }");
        assert_eq!(program.param_label("Program", "Test", 0), NullType::Nullable);
        assert_eq!(program.return_label("Program", "Test"), NullType::NonNull);
        let param = program.param_node("Program", "Test", 0);
        let ret = program.return_node("Program", "Test");
        assert!(!program.analysis.type_system().path_exists(param, ret));
    }

    #[test]
    fn constructor_initialised_field_follows_its_source() {
        let program = analyze_source(
            "class C { string? f; public C(string? s) { f = s; } string? G() => f; }",
        );
        assert_eq!(program.field_label("C", "f"), NullType::Nullable);
        assert_eq!(
            program.param_label("C", CONSTRUCTOR_NAME, 0),
            NullType::Nullable
        );
        assert_eq!(program.return_label("C", "G"), NullType::Nullable);
    }

    #[test]
    fn null_checked_dereference_keeps_the_parameter_nullable_without_warning() {
        let program = analyze_source(
            "class Program { static int Test(string? s) { if (s == null) return 0; return s.Length; } }",
        );
        assert_eq!(program.param_label("Program", "Test", 0), NullType::Nullable);
        assert!(program.analysis.diagnostics().is_empty());
    }

    #[test]
    fn unchecked_dereference_forces_the_parameter_non_null() {
        let program = analyze_source("class Program { static int Test(string? s) => s.Length; }");
        assert_eq!(program.param_label("Program", "Test", 0), NullType::NonNull);
        assert!(program.analysis.diagnostics().is_empty());
        assert!(program.emitted().contains("static int Test(string s)"));
    }

    #[test]
    fn generic_container_keeps_the_field_nullable_and_warns_at_the_use_site() {
        let program = analyze_source(
            "class Box<T> { T? v; public T? Get() => v; } \
             class Program { static void Main() { var b = new Box<string?>(); b.Get().ToString(); } }",
        );
        assert_eq!(program.field_label("Box", "v"), NullType::Nullable);
        assert_eq!(program.return_label("Box", "Get"), NullType::Nullable);
        assert_eq!(program.analysis.diagnostics().len(), 1);
        assert!(program.emitted().contains("new Box<string>("));
    }
}
