//! Row selection: attribute predicates, spatial queries and lock modes.

use geo::{Geometry, Relate};

/// Largest number of object ids placed in a single membership predicate.
///
/// Stores cap the length of a filter expression; callers with longer id
/// lists split them with [`Predicate::object_id_chunks`].
pub const MAX_OBJECT_IDS_PER_PREDICATE: usize = 2000;

/// Attribute filter applied when opening a cursor or counting rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Rows whose object id is one of the listed ids.
    ObjectIds(Vec<i64>),
    /// Backend-specific filter expression, such as an SQL `WHERE` fragment.
    ///
    /// The fragment is inlined as written. Literal values belong in the
    /// text itself: bound-parameter markers such as `?` or `:name` are
    /// rejected by backends that bind their own parameters around it.
    Where(String),
}

impl Predicate {
    /// Split `ids` into membership predicates of at most `max_per_chunk` ids.
    ///
    /// An empty id list yields no predicates. A `max_per_chunk` of zero is
    /// treated as one.
    ///
    /// ```
    /// use geoload_core::Predicate;
    ///
    /// let ids: Vec<i64> = (1..=5).collect();
    /// let chunks = Predicate::object_id_chunks(&ids, 2);
    /// assert_eq!(chunks.len(), 3);
    /// assert_eq!(chunks[2], Predicate::ObjectIds(vec![5]));
    /// ```
    #[must_use]
    pub fn object_id_chunks(ids: &[i64], max_per_chunk: usize) -> Vec<Self> {
        ids.chunks(max_per_chunk.max(1))
            .map(|chunk| Self::ObjectIds(chunk.to_vec()))
            .collect()
    }

    /// Whether `object_id` passes a membership predicate; `None` for
    /// predicates that cannot be evaluated against an id alone.
    #[must_use]
    pub fn matches_object_id(&self, object_id: i64) -> Option<bool> {
        match self {
            Self::ObjectIds(ids) => Some(ids.contains(&object_id)),
            Self::Where(_) => None,
        }
    }

    /// Render an SQL membership clause for `column`.
    ///
    /// ```
    /// use geoload_core::Predicate;
    ///
    /// let clause = Predicate::ObjectIds(vec![3, 7]).to_where_clause("OBJECTID");
    /// assert_eq!(clause, "OBJECTID IN (3, 7)");
    /// ```
    #[must_use]
    pub fn to_where_clause(&self, column: &str) -> String {
        match self {
            Self::ObjectIds(ids) if ids.is_empty() => "1 = 0".to_owned(),
            Self::ObjectIds(ids) => {
                let list: Vec<String> = ids.iter().map(ToString::to_string).collect();
                format!("{column} IN ({})", list.join(", "))
            }
            Self::Where(clause) => clause.clone(),
        }
    }
}

/// Spatial relationship tested between a query geometry and a candidate.
///
/// Relations read "query *relation* candidate": `Contains` selects
/// candidates the query geometry contains, `Within` selects candidates that
/// contain the query geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpatialRelation {
    /// Geometries share at least one point.
    #[default]
    Intersects,
    /// The query geometry contains the candidate.
    Contains,
    /// The query geometry lies within the candidate.
    Within,
    /// Boundaries meet but interiors do not.
    Touches,
    /// Geometries cross.
    Crosses,
    /// Geometries of equal dimension overlap.
    Overlaps,
    /// Geometries share no point.
    Disjoint,
}

impl SpatialRelation {
    /// Evaluate the relation using the DE-9IM matrix of the two geometries.
    #[must_use]
    pub fn holds(self, query: &Geometry<f64>, candidate: &Geometry<f64>) -> bool {
        let matrix = query.relate(candidate);
        match self {
            Self::Intersects => matrix.is_intersects(),
            Self::Contains => matrix.is_contains(),
            Self::Within => matrix.is_within(),
            Self::Touches => matrix.is_touches(),
            Self::Crosses => matrix.is_crosses(),
            Self::Overlaps => matrix.is_overlaps(),
            Self::Disjoint => matrix.is_disjoint(),
        }
    }

    /// Whether candidates must share the query's bounding box to satisfy the
    /// relation. Only `Disjoint` does not.
    #[must_use]
    pub const fn requires_envelope_overlap(self) -> bool {
        !matches!(self, Self::Disjoint)
    }
}

/// Fields a spatial query should populate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubFields {
    /// Every field.
    #[default]
    All,
    /// Only the named fields, plus the object id and geometry which are
    /// always populated. Other slots are left `Null`.
    Only(Vec<String>),
}

impl SubFields {
    /// Parse a comma-separated projection; `*` or an empty string selects all.
    ///
    /// ```
    /// use geoload_core::SubFields;
    ///
    /// assert_eq!(SubFields::parse("*"), SubFields::All);
    /// assert_eq!(
    ///     SubFields::parse("NAME, CLASS"),
    ///     SubFields::Only(vec!["NAME".into(), "CLASS".into()]),
    /// );
    /// ```
    #[must_use]
    pub fn parse(projection: &str) -> Self {
        let names: Vec<String> = projection
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect();
        if names.is_empty() || names.iter().any(|name| name == "*") {
            Self::All
        } else {
            Self::Only(names)
        }
    }

    /// Whether the field called `name` is part of the projection.
    #[must_use]
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.iter().any(|n| crate::field_names_match(n, name)),
        }
    }
}

/// A spatial filter: geometry, relation, projection and optional attribute
/// predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialQuery {
    /// Geometry the candidates are compared against.
    pub geometry: Geometry<f64>,
    /// Relation a candidate must satisfy.
    pub relation: SpatialRelation,
    /// Fields to populate on returned rows.
    pub sub_fields: SubFields,
    /// Additional attribute filter.
    pub predicate: Option<Predicate>,
}

impl SpatialQuery {
    /// Query for rows intersecting `geometry`, with every field populated.
    #[must_use]
    pub fn intersecting(geometry: Geometry<f64>) -> Self {
        Self {
            geometry,
            relation: SpatialRelation::Intersects,
            sub_fields: SubFields::All,
            predicate: None,
        }
    }
}

/// Schema lock held on a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaLock {
    /// Normal shared access.
    #[default]
    Shared,
    /// Exclusive access for bulk operations.
    Exclusive,
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{point, polygon};
    use rstest::rstest;

    fn unit_square() -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ])
    }

    #[rstest]
    #[case(SpatialRelation::Intersects, true)]
    #[case(SpatialRelation::Contains, true)]
    #[case(SpatialRelation::Within, false)]
    #[case(SpatialRelation::Disjoint, false)]
    fn relation_reads_query_then_candidate(
        #[case] relation: SpatialRelation,
        #[case] expected: bool,
    ) {
        let inside = Geometry::Point(point! { x: 0.5, y: 0.5 });
        assert_eq!(relation.holds(&unit_square(), &inside), expected);
    }

    #[rstest]
    fn chunks_respect_limit() {
        let ids: Vec<i64> = (0..4001).collect();
        let chunks = Predicate::object_id_chunks(&ids, MAX_OBJECT_IDS_PER_PREDICATE);
        let sizes: Vec<usize> = chunks
            .iter()
            .map(|p| match p {
                Predicate::ObjectIds(ids) => ids.len(),
                Predicate::Where(_) => 0,
            })
            .collect();
        assert_eq!(sizes, vec![2000, 2000, 1]);
    }

    #[rstest]
    fn empty_id_list_yields_no_chunks() {
        assert!(Predicate::object_id_chunks(&[], 10).is_empty());
    }

    #[rstest]
    fn sub_fields_match_case_insensitively() {
        let projection = SubFields::parse("name");
        assert!(projection.includes("NAME"));
        assert!(!projection.includes("CLASS"));
    }
}
