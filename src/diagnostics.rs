use serde_sarif::sarif::{
    ArtifactLocation, Location as SarifLocation, LogicalLocation, Message, PhysicalLocation,
    Region, Result as SarifResult,
};

use crate::graph::TypeSystem;
use crate::syntax::{Compilation, Location};

/// One surfaced warning: inferred null flow through a position the user
/// asserted non-null.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub message: String,
    /// Name of the nullability position the flow originates from.
    pub position: String,
    /// Name of the translation unit, when the edge has a source location.
    pub unit: Option<String>,
    pub location: Option<Location>,
}

/// Collect the diagnostic edges: error-sensitive edges that ended up
/// carrying flow after the solver ran. Never fatal, only surfaced.
pub(crate) fn collect_diagnostics(ts: &TypeSystem, compilation: &Compilation) -> Vec<Diagnostic> {
    ts.all_edges()
        .filter(|edge| edge.is_error && edge.flow > 0)
        .map(|edge| {
            let source = ts.node(edge.source);
            let location = edge.location.or(source.location);
            let unit = location
                .and_then(|l| compilation.units.get(l.unit as usize))
                .map(|tu| tu.name.clone());
            Diagnostic {
                message: format!("nullable value reaches non-null context: {}", edge.label),
                position: source.name.clone(),
                unit,
                location,
            }
        })
        .collect()
}

/// Render diagnostics as SARIF results, one per warning, with a logical
/// location naming the position and a physical location when known.
pub fn to_sarif_results(diagnostics: &[Diagnostic]) -> Vec<SarifResult> {
    diagnostics
        .iter()
        .map(|diagnostic| {
            let message = Message::builder().text(&diagnostic.message).build();
            let logical = LogicalLocation::builder()
                .name(&diagnostic.position)
                .build();
            let location = match (&diagnostic.unit, &diagnostic.location) {
                (Some(unit), Some(position)) => {
                    let artifact = ArtifactLocation::builder().uri(unit.clone()).build();
                    let region = Region::builder()
                        .start_line(position.line as i64)
                        .start_column(position.column as i64)
                        .build();
                    let physical = PhysicalLocation::builder()
                        .artifact_location(artifact)
                        .region(region)
                        .build();
                    SarifLocation::builder()
                        .logical_locations(vec![logical])
                        .physical_location(physical)
                        .build()
                }
                _ => SarifLocation::builder()
                    .logical_locations(vec![logical])
                    .build(),
            };
            SarifResult::builder()
                .message(message)
                .locations(vec![location])
                .build()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Diagnostic> {
        vec![Diagnostic {
            message: "nullable value reaches non-null context: member access Length".to_string(),
            position: "parameter s of C.Test".to_string(),
            unit: Some("test.cs".to_string()),
            location: Some(Location {
                unit: 0,
                line: 3,
                column: 14,
            }),
        }]
    }

    #[test]
    fn sarif_results_carry_logical_and_physical_locations() {
        let results = to_sarif_results(&sample());
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(
            result
                .message
                .text
                .as_deref()
                .expect("message text")
                .contains("member access Length")
        );
        let locations = result.locations.as_ref().expect("locations");
        let location = &locations[0];
        let logical = location.logical_locations.as_ref().expect("logical");
        assert_eq!(logical[0].name.as_deref(), Some("parameter s of C.Test"));
        let physical = location.physical_location.as_ref().expect("physical");
        let artifact = physical.artifact_location.as_ref().expect("artifact");
        assert_eq!(artifact.uri.as_deref(), Some("test.cs"));
    }

    #[test]
    fn missing_source_positions_render_logical_only() {
        let mut diagnostics = sample();
        diagnostics[0].unit = None;
        diagnostics[0].location = None;
        let results = to_sarif_results(&diagnostics);
        assert!(results[0].locations.as_ref().expect("locations")[0]
            .physical_location
            .is_none());
    }
}
