use crate::geometry;
use geo::bounding_rect::BoundingRect;
use geo::{Coord, MultiPolygon};
use geojson::{Feature, FeatureCollection};
use rayon::prelude::*;
use rstar::{RTree, AABB};
use serde_json::Value;
use std::convert::TryInto;
use std::fmt;

/// Property key the per-district count is written under.
pub const COUNT_PROPERTY: &str = "facility_count";

/// A district feature whose geometry could not be used for counting. The
/// boundary file is curated static data, so this points at a deployment
/// problem rather than routine noise; it is reported per feature and the
/// rest of the collection is still annotated.
#[derive(Debug, Clone)]
pub struct GeometryError {
    pub district: String,
    pub reason: String,
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "district {}: {}", self.district, self.reason)
    }
}

/// Output of one aggregation pass: a fresh collection with counts injected,
/// plus whatever went wrong per feature. The input collection is never
/// mutated, so concurrent passes over the same instance cannot observe each
/// other's partial writes.
pub struct Annotated {
    pub collection: FeatureCollection,
    pub errors: Vec<GeometryError>,
}

/// Counts, for every district polygon, the facility points strictly inside
/// it, and returns a copy of the collection with `facility_count` set on each
/// well-formed feature's properties. Any existing value under that key is
/// overwritten; all other properties, foreign members, and the feature order
/// are preserved.
///
/// Classification is per polygon with no exclusivity: a point inside two
/// overlapping districts counts toward both. The result is independent of
/// the order of `points`.
pub fn annotate(collection: &FeatureCollection, points: &[Coord<f64>]) -> Annotated {
    // The exact test only ever sees points whose coordinates fall inside the
    // polygon's bounding box; the R-tree lookup cannot change the outcome,
    // only skip points that would classify as outside anyway.
    let tree = RTree::bulk_load(points.iter().map(|c| [c.x, c.y]).collect());

    let results: Vec<(Feature, Option<GeometryError>)> = collection
        .features
        .par_iter()
        .enumerate()
        .map(|(index, feature)| annotate_feature(index, feature, &tree))
        .collect();

    let mut features = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for (feature, error) in results {
        features.push(feature);
        if let Some(error) = error {
            errors.push(error);
        }
    }

    Annotated {
        collection: FeatureCollection {
            bbox: collection.bbox.clone(),
            features,
            foreign_members: collection.foreign_members.clone(),
        },
        errors,
    }
}

fn annotate_feature(
    index: usize,
    feature: &Feature,
    tree: &RTree<[f64; 2]>,
) -> (Feature, Option<GeometryError>) {
    let mut feature = feature.clone();
    match district_polygons(&feature) {
        Ok(multi) => {
            let count = count_contained(&multi, tree);
            feature
                .properties
                .get_or_insert_with(Default::default)
                .insert(COUNT_PROPERTY.to_string(), Value::from(count));
            (feature, None)
        }
        Err(reason) => {
            let district = district_label(index, &feature);
            (feature, Some(GeometryError { district, reason }))
        }
    }
}

fn district_polygons(feature: &Feature) -> Result<MultiPolygon<f64>, String> {
    let geometry = feature
        .geometry
        .as_ref()
        .ok_or_else(|| "feature has no geometry".to_string())?;

    let converted: geo::Geometry<f64> = geometry
        .value
        .clone()
        .try_into()
        .map_err(|e| format!("unreadable geometry: {:?}", e))?;

    let multi = match converted {
        geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        geo::Geometry::MultiPolygon(mp) => mp,
        other => {
            return Err(format!(
                "expected Polygon or MultiPolygon, got {}",
                geometry_kind(&other)
            ))
        }
    };

    for polygon in &multi.0 {
        if polygon.exterior().0.len() < 4 {
            return Err(format!(
                "outer ring has {} positions, need at least 4",
                polygon.exterior().0.len()
            ));
        }
    }

    Ok(multi)
}

fn geometry_kind(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
        _ => "unsupported geometry",
    }
}

fn count_contained(multi: &MultiPolygon<f64>, tree: &RTree<[f64; 2]>) -> u64 {
    let Some(rect) = multi.bounding_rect() else {
        return 0;
    };
    let envelope = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);

    tree.locate_in_envelope(&envelope)
        .filter(|p| geometry::multi_polygon_contains(multi, Coord { x: p[0], y: p[1] }))
        .count() as u64
}

fn district_label(index: usize, feature: &Feature) -> String {
    let named = feature.properties.as_ref().and_then(|props| {
        props
            .get("name")
            .or_else(|| props.get("Name"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    named.unwrap_or_else(|| format!("feature #{}", index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::{Geometry, Value as GeoValue};
    use serde_json::json;

    fn square_feature(name: &str, origin: (f64, f64), size: f64) -> Feature {
        let (x, y) = origin;
        let ring = vec![
            vec![x, y],
            vec![x + size, y],
            vec![x + size, y + size],
            vec![x, y + size],
            vec![x, y],
        ];
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(GeoValue::Polygon(vec![ring]))),
            id: None,
            properties: Some(
                [("name".to_string(), json!(name))].into_iter().collect(),
            ),
            foreign_members: None,
        }
    }

    fn collection(features: Vec<Feature>) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    fn count_of(annotated: &Annotated, index: usize) -> u64 {
        annotated.collection.features[index]
            .properties
            .as_ref()
            .unwrap()
            .get(COUNT_PROPERTY)
            .and_then(Value::as_u64)
            .unwrap()
    }

    #[test]
    fn disjoint_squares_count_independently() {
        let districts = collection(vec![
            square_feature("west", (0.0, 0.0), 1.0),
            square_feature("east", (10.0, 0.0), 1.0),
        ]);
        let points = vec![
            // 3 in the west square
            Coord { x: 0.2, y: 0.2 },
            Coord { x: 0.5, y: 0.5 },
            Coord { x: 0.8, y: 0.8 },
            // 5 in the east square
            Coord { x: 10.1, y: 0.1 },
            Coord { x: 10.3, y: 0.3 },
            Coord { x: 10.5, y: 0.5 },
            Coord { x: 10.7, y: 0.7 },
            Coord { x: 10.9, y: 0.9 },
            // 2 outside both
            Coord { x: 5.0, y: 5.0 },
            Coord { x: -3.0, y: 0.5 },
        ];

        let annotated = annotate(&districts, &points);
        assert!(annotated.errors.is_empty());
        assert_eq!(count_of(&annotated, 0), 3);
        assert_eq!(count_of(&annotated, 1), 5);
    }

    #[test]
    fn counts_are_order_independent_and_idempotent() {
        let districts = collection(vec![square_feature("west", (0.0, 0.0), 1.0)]);
        let mut points = vec![
            Coord { x: 0.2, y: 0.2 },
            Coord { x: 0.5, y: 0.5 },
            Coord { x: 2.0, y: 2.0 },
            Coord { x: 0.8, y: 0.1 },
        ];

        let forward = annotate(&districts, &points);
        points.reverse();
        let reversed = annotate(&districts, &points);
        let again = annotate(&districts, &points);

        assert_eq!(count_of(&forward, 0), 3);
        assert_eq!(count_of(&reversed, 0), 3);
        assert_eq!(count_of(&again, 0), 3);
    }

    #[test]
    fn boundary_points_do_not_count() {
        let districts = collection(vec![square_feature("unit", (0.0, 0.0), 1.0)]);
        let points = vec![
            Coord { x: 1.0, y: 0.5 }, // right edge
            Coord { x: 0.0, y: 0.0 }, // corner
            Coord { x: 0.5, y: 0.5 }, // interior
        ];

        let annotated = annotate(&districts, &points);
        assert_eq!(count_of(&annotated, 0), 1);
    }

    #[test]
    fn hole_excludes_points_inside_it() {
        let outer = vec![
            vec![0.0, 0.0],
            vec![4.0, 0.0],
            vec![4.0, 4.0],
            vec![0.0, 4.0],
            vec![0.0, 0.0],
        ];
        let hole = vec![
            vec![1.0, 1.0],
            vec![3.0, 1.0],
            vec![3.0, 3.0],
            vec![1.0, 3.0],
            vec![1.0, 1.0],
        ];
        let feature = Feature {
            bbox: None,
            geometry: Some(Geometry::new(GeoValue::Polygon(vec![outer, hole]))),
            id: None,
            properties: Some([("name".to_string(), json!("donut"))].into_iter().collect()),
            foreign_members: None,
        };
        let districts = collection(vec![feature]);
        let points = vec![
            Coord { x: 0.5, y: 0.5 }, // inside outer, outside hole
            Coord { x: 2.0, y: 2.0 }, // inside hole
        ];

        let annotated = annotate(&districts, &points);
        assert_eq!(count_of(&annotated, 0), 1);
    }

    #[test]
    fn overlapping_districts_each_count_the_shared_point() {
        let districts = collection(vec![
            square_feature("a", (0.0, 0.0), 2.0),
            square_feature("b", (1.0, 1.0), 2.0),
        ]);
        let points = vec![Coord { x: 1.5, y: 1.5 }];

        let annotated = annotate(&districts, &points);
        assert_eq!(count_of(&annotated, 0), 1);
        assert_eq!(count_of(&annotated, 1), 1);
    }

    #[test]
    fn malformed_feature_does_not_block_the_rest() {
        let mut broken = square_feature("broken", (0.0, 0.0), 1.0);
        broken.geometry = None;
        let districts = collection(vec![
            broken,
            square_feature("ok", (10.0, 0.0), 1.0),
        ]);
        let points = vec![Coord { x: 10.5, y: 0.5 }];

        let annotated = annotate(&districts, &points);
        assert_eq!(annotated.errors.len(), 1);
        assert_eq!(annotated.errors[0].district, "broken");
        // broken feature passes through without a count
        assert!(annotated.collection.features[0]
            .properties
            .as_ref()
            .unwrap()
            .get(COUNT_PROPERTY)
            .is_none());
        assert_eq!(count_of(&annotated, 1), 1);
    }

    #[test]
    fn short_outer_ring_is_a_reported_error() {
        let feature = Feature {
            bbox: None,
            geometry: Some(Geometry::new(GeoValue::Polygon(vec![vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![0.0, 0.0],
            ]]))),
            id: None,
            properties: Some([("name".to_string(), json!("sliver"))].into_iter().collect()),
            foreign_members: None,
        };
        let annotated = annotate(&collection(vec![feature]), &[Coord { x: 0.5, y: 0.1 }]);
        assert_eq!(annotated.errors.len(), 1);
        assert!(annotated.errors[0].reason.contains("outer ring"));
    }

    #[test]
    fn existing_count_and_other_properties_survive() {
        let mut feature = square_feature("west", (0.0, 0.0), 1.0);
        let props = feature.properties.as_mut().unwrap();
        props.insert(COUNT_PROPERTY.to_string(), json!(999));
        props.insert("ward".to_string(), json!(4));
        let districts = collection(vec![feature]);

        let annotated = annotate(&districts, &[Coord { x: 0.5, y: 0.5 }]);
        let props = annotated.collection.features[0].properties.as_ref().unwrap();
        assert_eq!(props[COUNT_PROPERTY], json!(1)); // stale value overwritten
        assert_eq!(props["ward"], json!(4));
        assert_eq!(props["name"], json!("west"));
        // input collection untouched
        assert_eq!(
            districts.features[0].properties.as_ref().unwrap()[COUNT_PROPERTY],
            json!(999)
        );
    }

    #[test]
    fn empty_inputs_are_not_errors() {
        let empty = annotate(&collection(vec![]), &[Coord { x: 0.0, y: 0.0 }]);
        assert!(empty.collection.features.is_empty());
        assert!(empty.errors.is_empty());

        let no_points = annotate(
            &collection(vec![square_feature("west", (0.0, 0.0), 1.0)]),
            &[],
        );
        assert!(no_points.errors.is_empty());
        assert_eq!(count_of(&no_points, 0), 0);
    }

    #[test]
    fn multi_polygon_district_counts_all_members() {
        let feature = Feature {
            bbox: None,
            geometry: Some(Geometry::new(GeoValue::MultiPolygon(vec![
                vec![vec![
                    vec![0.0, 0.0],
                    vec![1.0, 0.0],
                    vec![1.0, 1.0],
                    vec![0.0, 1.0],
                    vec![0.0, 0.0],
                ]],
                vec![vec![
                    vec![10.0, 0.0],
                    vec![11.0, 0.0],
                    vec![11.0, 1.0],
                    vec![10.0, 1.0],
                    vec![10.0, 0.0],
                ]],
            ]))),
            id: None,
            properties: Some([("name".to_string(), json!("split"))].into_iter().collect()),
            foreign_members: None,
        };
        let points = vec![
            Coord { x: 0.5, y: 0.5 },
            Coord { x: 10.5, y: 0.5 },
            Coord { x: 5.0, y: 0.5 },
        ];

        let annotated = annotate(&collection(vec![feature]), &points);
        assert_eq!(count_of(&annotated, 0), 2);
    }
}
