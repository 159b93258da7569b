//! Search evaluation: lowers the query AST to SQL over the cache
//! store and returns ranked track rows.

use crate::cache::models::Track;
use crate::search::parser::{Field, FieldOp, SearchNode};
use mc_common::Result;
use sqlx::sqlite::SqlitePool;

/// Caller-supplied sort override.
#[derive(Debug, Clone)]
pub struct SortSpec {
    pub field: Field,
    pub descending: bool,
}

/// Bound parameter for the generated SQL.
enum Bind {
    Text(String),
    Num(f64),
}

/// Scalar column backing a field, for LIKE/equality matching.
fn text_column(field: Field) -> Option<&'static str> {
    Some(match field {
        Field::Artist => "artist",
        Field::Title => "title",
        Field::Album => "album",
        Field::Genre => "genre",
        Field::Key => "key_musical",
        Field::Year => "year",
        Field::Tracknumber => "tracknumber",
        Field::Comment => "comment",
        Field::Color => "color",
        Field::File => "file",
        Field::Bpm | Field::Rating | Field::Crate => return None,
    })
}

/// SQL expression yielding the field as a number.
fn numeric_expr(field: Field) -> &'static str {
    match field {
        Field::Bpm => "bpm",
        Field::Rating => "rating",
        Field::Year => "CAST(year AS REAL)",
        Field::Tracknumber => "CAST(tracknumber AS REAL)",
        _ => unreachable!("comparison is only parsed for numeric fields"),
    }
}

/// Escape LIKE wildcards and build a contains pattern.
fn like_pattern(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped.to_lowercase())
}

/// FTS5 prefix-phrase match expression for a text term.
fn fts_match_expr(term: &str) -> String {
    format!("\"{}\"*", term.replace('"', "\"\""))
}

fn lower_node(node: &SearchNode, sql: &mut String, binds: &mut Vec<Bind>) {
    match node {
        SearchNode::Text(term) => {
            sql.push_str("key IN (SELECT key FROM tracks_fts WHERE tracks_fts MATCH ?)");
            binds.push(Bind::Text(fts_match_expr(term)));
        }
        SearchNode::Filter { field, op } => lower_filter(*field, op, sql, binds),
        SearchNode::Not(child) => {
            sql.push_str("key NOT IN (SELECT key FROM tracks WHERE ");
            lower_node(child, sql, binds);
            sql.push(')');
        }
        SearchNode::And(children) => {
            if children.is_empty() {
                sql.push_str("1=1");
                return;
            }
            sql.push('(');
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                lower_node(child, sql, binds);
            }
            sql.push(')');
        }
        SearchNode::Or(children) => {
            sql.push('(');
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" OR ");
                }
                lower_node(child, sql, binds);
            }
            sql.push(')');
        }
    }
}

fn lower_filter(field: Field, op: &FieldOp, sql: &mut String, binds: &mut Vec<Bind>) {
    match op {
        FieldOp::Contains(value) => {
            if field == Field::Crate {
                sql.push_str(
                    "key IN (SELECT key FROM track_crates WHERE lower(crate) LIKE ? ESCAPE '\\')",
                );
                binds.push(Bind::Text(like_pattern(value)));
                return;
            }
            // A numeric value on a numeric field means equality.
            if field.is_numeric() {
                if let Ok(number) = value.parse::<f64>() {
                    sql.push_str(&format!("{} = ?", numeric_expr(field)));
                    binds.push(Bind::Num(number));
                    return;
                }
            }
            let column = text_column(field).expect("non-crate field has a column");
            sql.push_str(&format!(
                "lower(COALESCE({column}, '')) LIKE ? ESCAPE '\\'"
            ));
            binds.push(Bind::Text(like_pattern(value)));
        }
        FieldOp::Equals(value) => {
            if field == Field::Crate {
                sql.push_str("key IN (SELECT key FROM track_crates WHERE lower(crate) = lower(?))");
                binds.push(Bind::Text(value.clone()));
                return;
            }
            let column = text_column(field)
                .map(str::to_string)
                .unwrap_or_else(|| format!("CAST({} AS TEXT)", numeric_expr(field)));
            sql.push_str(&format!("lower(COALESCE({column}, '')) = lower(?)"));
            binds.push(Bind::Text(value.clone()));
        }
        FieldOp::Gt(n) => push_cmp(field, ">", *n, sql, binds),
        FieldOp::Gte(n) => push_cmp(field, ">=", *n, sql, binds),
        FieldOp::Lt(n) => push_cmp(field, "<", *n, sql, binds),
        FieldOp::Lte(n) => push_cmp(field, "<=", *n, sql, binds),
        FieldOp::Range(lo, hi) => {
            let expr = numeric_expr(field);
            sql.push_str(&format!("({expr} >= ? AND {expr} <= ?)"));
            binds.push(Bind::Num(*lo));
            binds.push(Bind::Num(*hi));
        }
        FieldOp::IsEmpty => {
            if field == Field::Crate {
                sql.push_str("key NOT IN (SELECT key FROM track_crates)");
                return;
            }
            let column = text_column(field)
                .map(str::to_string)
                .unwrap_or_else(|| numeric_expr(field).to_string());
            sql.push_str(&format!("({column} IS NULL OR {column} = '')"));
        }
    }
}

fn push_cmp(field: Field, op: &str, n: f64, sql: &mut String, binds: &mut Vec<Bind>) {
    sql.push_str(&format!("{} {op} ?", numeric_expr(field)));
    binds.push(Bind::Num(n));
}

fn order_expr(field: Field, descending: bool) -> String {
    let direction = if descending { "DESC" } else { "ASC" };
    let expr = match field {
        Field::Bpm => "bpm".to_string(),
        Field::Rating => "rating".to_string(),
        Field::Year => "CAST(year AS REAL)".to_string(),
        Field::Tracknumber => "CAST(tracknumber AS REAL)".to_string(),
        other => format!(
            "lower({})",
            text_column(other).expect("crate is not sortable")
        ),
    };
    format!("{expr} {direction} NULLS LAST")
}

/// Execute a parsed query against the cache.
///
/// Default ordering is `artist, album, tracknumber` ascending with
/// NULLs last; `sort` overrides it. An empty query returns all tracks.
pub async fn execute_search(
    pool: &SqlitePool,
    ast: &SearchNode,
    sort: Option<&SortSpec>,
    limit: Option<i64>,
) -> Result<Vec<Track>> {
    let mut predicate = String::new();
    let mut binds = Vec::new();
    lower_node(ast, &mut predicate, &mut binds);

    let order = match sort {
        Some(spec) => order_expr(spec.field, spec.descending),
        None => format!(
            "{}, {}, {}",
            order_expr(Field::Artist, false),
            order_expr(Field::Album, false),
            order_expr(Field::Tracknumber, false)
        ),
    };

    let mut sql = format!("SELECT * FROM tracks WHERE {predicate} ORDER BY {order}");
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {n}"));
    }

    let mut query = sqlx::query_as::<_, Track>(&sql);
    for bind in &binds {
        query = match bind {
            Bind::Text(s) => query.bind(s),
            Bind::Num(n) => query.bind(n),
        };
    }

    Ok(query.fetch_all(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::models::{CacheState, CrateMembership, Track};
    use crate::cache::store::CacheStore;
    use crate::search::parser::parse_query;
    use tempfile::TempDir;

    fn seed_track(
        key: &str,
        file: &str,
        artist: Option<&str>,
        title: &str,
        album: Option<&str>,
        genre: Option<&str>,
        bpm: Option<f64>,
        rating: Option<i64>,
        key_musical: Option<&str>,
        year: Option<&str>,
    ) -> Track {
        Track {
            key: key.into(),
            file: Some(file.into()),
            artist: artist.map(Into::into),
            title: Some(title.into()),
            album: album.map(Into::into),
            genre: genre.map(Into::into),
            bpm,
            rating,
            key_musical: key_musical.map(Into::into),
            year: year.map(Into::into),
            present: true,
            ..Default::default()
        }
    }

    async fn setup() -> (TempDir, CacheStore) {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open_or_create(dir.path()).await.unwrap();

        let tracks = vec![
            seed_track(
                "k1",
                "darkpsy/Artist1 - Dark Track.mp3",
                Some("Dark Artist"),
                "Dark Track",
                Some("Dark Album"),
                Some("Darkpsy"),
                Some(148.0),
                Some(5),
                Some("Am"),
                Some("2023"),
            ),
            seed_track(
                "k2",
                "ambient/Artist2 - Calm Song.flac",
                Some("Ambient Artist"),
                "Calm Song",
                Some("Calm Album"),
                Some("Ambient"),
                Some(80.0),
                Some(3),
                Some("C"),
                Some("2020"),
            ),
            seed_track(
                "k3",
                "techno/DJ Test - Banger.mp3",
                Some("DJ Test"),
                "Banger",
                Some("Club Hits"),
                Some("Techno"),
                Some(140.0),
                Some(4),
                Some("Dm"),
                Some("2024"),
            ),
            seed_track(
                "k4",
                "house/House DJ - Groovy.mp3",
                Some("House DJ"),
                "Groovy",
                Some("House Collection"),
                Some("House"),
                Some(125.0),
                Some(4),
                Some("F"),
                Some("2022"),
            ),
            seed_track(
                "k5",
                "minimal/Minimal - Empty.mp3",
                None,
                "Empty",
                None,
                None,
                None,
                None,
                None,
                None,
            ),
        ];
        let crates = vec![
            CrateMembership { key: "k1".into(), crate_name: "Festival".into() },
            CrateMembership { key: "k1".into(), crate_name: "DarkPsy".into() },
            CrateMembership { key: "k3".into(), crate_name: "Festival".into() },
            CrateMembership { key: "k3".into(), crate_name: "Club".into() },
            CrateMembership { key: "k4".into(), crate_name: "Club".into() },
        ];
        store
            .replace_all(&tracks, &crates, &CacheState::default())
            .await
            .unwrap();
        (dir, store)
    }

    async fn keys(store: &CacheStore, query: &str) -> Vec<String> {
        let ast = parse_query(query).unwrap();
        execute_search(store.pool(), &ast, None, None)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.key)
            .collect()
    }

    async fn key_set(store: &CacheStore, query: &str) -> std::collections::BTreeSet<String> {
        keys(store, query).await.into_iter().collect()
    }

    macro_rules! set {
        ($($k:expr),*) => {
            [$($k),*].iter().map(|s: &&str| s.to_string()).collect::<std::collections::BTreeSet<String>>()
        };
    }

    #[tokio::test]
    async fn text_term_matches_fulltext() {
        let (_dir, store) = setup().await;
        assert!(key_set(&store, "Dark").await.contains("k1"));
    }

    #[tokio::test]
    async fn two_text_terms_are_anded() {
        let (_dir, store) = setup().await;
        assert!(key_set(&store, "Calm Song").await.contains("k2"));
    }

    #[tokio::test]
    async fn negated_text_excludes_matches() {
        let (_dir, store) = setup().await;
        let result = key_set(&store, "-Dark").await;
        assert!(!result.contains("k1"));
        assert!(result.len() >= 3);
    }

    #[tokio::test]
    async fn field_contains_is_case_insensitive() {
        let (_dir, store) = setup().await;
        assert_eq!(key_set(&store, "artist:dark").await, set!["k1"]);
    }

    #[tokio::test]
    async fn exact_match_rejects_partials() {
        let (_dir, store) = setup().await;
        assert_eq!(key_set(&store, "artist:=\"DJ Test\"").await, set!["k3"]);
        assert!(key_set(&store, "artist:=\"DJ\"").await.is_empty());
    }

    #[tokio::test]
    async fn numeric_comparisons() {
        let (_dir, store) = setup().await;
        assert_eq!(key_set(&store, "bpm:>140").await, set!["k1"]);
        assert_eq!(key_set(&store, "bpm:>=140").await, set!["k1", "k3"]);
        assert_eq!(key_set(&store, "bpm:<100").await, set!["k2"]);
        assert_eq!(key_set(&store, "rating:<=3").await, set!["k2"]);
    }

    #[tokio::test]
    async fn numeric_range_is_inclusive() {
        let (_dir, store) = setup().await;
        assert_eq!(key_set(&store, "bpm:120-145").await, set!["k3", "k4"]);
        assert_eq!(key_set(&store, "bpm:125-140").await, set!["k3", "k4"]);
    }

    #[tokio::test]
    async fn numeric_equality_via_contains() {
        let (_dir, store) = setup().await;
        assert_eq!(key_set(&store, "bpm:148").await, set!["k1"]);
        assert_eq!(key_set(&store, "rating:4").await, set!["k3", "k4"]);
    }

    #[tokio::test]
    async fn year_comparison_casts_text() {
        let (_dir, store) = setup().await;
        let result = key_set(&store, "year:>2022").await;
        assert!(result.contains("k1"));
        assert!(result.contains("k3"));
        assert!(!result.contains("k4"));
    }

    #[tokio::test]
    async fn negated_field_keeps_nulls() {
        let (_dir, store) = setup().await;
        let result = key_set(&store, "-genre:Ambient").await;
        assert!(!result.contains("k2"));
        assert!(result.contains("k1"));
        assert!(result.contains("k5"));
    }

    #[tokio::test]
    async fn file_and_key_fields() {
        let (_dir, store) = setup().await;
        assert_eq!(key_set(&store, "file:darkpsy").await, set!["k1"]);
        assert_eq!(key_set(&store, "key:Am").await, set!["k1"]);
    }

    #[tokio::test]
    async fn empty_field_matches_null() {
        let (_dir, store) = setup().await;
        assert!(key_set(&store, "genre:\"\"").await.contains("k5"));
        assert!(key_set(&store, "artist:\"\"").await.contains("k5"));
    }

    #[tokio::test]
    async fn or_groups_union() {
        let (_dir, store) = setup().await;
        assert_eq!(
            key_set(&store, "genre:House | genre:Techno").await,
            set!["k3", "k4"]
        );
    }

    #[tokio::test]
    async fn crate_contains_exact_and_negated() {
        let (_dir, store) = setup().await;
        assert_eq!(key_set(&store, "crate:Festival").await, set!["k1", "k3"]);
        assert_eq!(key_set(&store, "crate:=Club").await, set!["k3", "k4"]);

        let negated = key_set(&store, "-crate:Festival").await;
        assert!(!negated.contains("k1"));
        assert!(!negated.contains("k3"));
        assert!(negated.contains("k2"));
    }

    #[tokio::test]
    async fn combined_text_and_field() {
        let (_dir, store) = setup().await;
        assert_eq!(key_set(&store, "Dark bpm:>140").await, set!["k1"]);
    }

    #[tokio::test]
    async fn field_and_or_combination() {
        let (_dir, store) = setup().await;
        assert_eq!(
            key_set(&store, "rating:>=4 genre:Techno | rating:>=4 genre:House").await,
            set!["k3", "k4"]
        );
    }

    #[tokio::test]
    async fn empty_query_returns_all() {
        let (_dir, store) = setup().await;
        assert_eq!(keys(&store, "").await.len(), 5);
    }

    #[tokio::test]
    async fn default_ordering_by_artist_nulls_last() {
        let (_dir, store) = setup().await;
        let ordered = keys(&store, "").await;
        // Ambient Artist, DJ Test, Dark Artist, House DJ, then NULL artist
        assert_eq!(ordered.last().unwrap(), "k5");
        assert_eq!(ordered[0], "k2");
    }

    #[tokio::test]
    async fn or_query_default_order_is_by_artist() {
        let (_dir, store) = setup().await;
        let ordered = keys(&store, "genre:Darkpsy | bpm:>=140").await;
        assert_eq!(ordered, vec!["k1".to_string(), "k3".to_string()]);
    }

    #[tokio::test]
    async fn sort_override_descending() {
        let (_dir, store) = setup().await;
        let ast = parse_query("bpm:>0").unwrap();
        let sort = SortSpec {
            field: Field::Bpm,
            descending: true,
        };
        let rows = execute_search(store.pool(), &ast, Some(&sort), None)
            .await
            .unwrap();
        let bpms: Vec<f64> = rows.iter().map(|t| t.bpm.unwrap()).collect();
        assert_eq!(bpms, vec![148.0, 140.0, 125.0, 80.0]);
    }

    #[tokio::test]
    async fn limit_truncates_results() {
        let (_dir, store) = setup().await;
        let ast = parse_query("").unwrap();
        let rows = execute_search(store.pool(), &ast, None, Some(2)).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
