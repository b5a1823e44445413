// SQL text for the PostgreSQL store. Relation names are always quoted here.
use crate::core::query::Query;
use crate::store::RelationSchema;

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Table, unique index, GIN index, BTREE index; run inside one transaction.
pub(crate) fn create_relation(schema: &RelationSchema) -> Vec<String> {
    let name = &schema.name;
    let table = quote_ident(name);
    let unique_name = format!("{name} {}", schema.unique_fields.concat());
    let unique_columns = schema
        .unique_fields
        .iter()
        .map(|field| format!("(data->'{field}')"))
        .collect::<Vec<_>>()
        .join(",");
    vec![
        format!("CREATE TABLE {table} ( data JSONB NOT NULL )"),
        format!(
            "CREATE UNIQUE INDEX {} ON {table} ({unique_columns})",
            quote_ident(&unique_name)
        ),
        format!(
            "CREATE INDEX {} ON {table} USING GIN (data jsonb_path_ops)",
            quote_ident(&format!("{name} gin"))
        ),
        format!(
            "CREATE INDEX {} ON {table} USING BTREE (data)",
            quote_ident(&format!("{name} btree"))
        ),
    ]
}

pub(crate) fn insert(relation: &str) -> String {
    format!(
        "INSERT INTO {} (data) VALUES ($1) ON CONFLICT DO NOTHING",
        quote_ident(relation)
    )
}

pub(crate) fn update(relation: &str) -> String {
    format!(
        "UPDATE {} SET data = $1 WHERE data @> $2",
        quote_ident(relation)
    )
}

pub(crate) fn delete(relation: &str) -> String {
    format!("DELETE FROM {} WHERE data @> $1", quote_ident(relation))
}

/// `UNION` drops rows that are identical across relations.
pub(crate) fn select(relations: &[String], query: &Query) -> String {
    let predicate = match query {
        Query::Contains(_) => "data @> $1",
        Query::Path(_) => "data @@ $1::text::jsonpath",
    };
    relations
        .iter()
        .map(|relation| format!("SELECT data FROM {} WHERE {predicate}", quote_ident(relation)))
        .collect::<Vec<_>>()
        .join(" UNION ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quoting_escapes_double_quotes() {
        assert_eq!(quote_ident("human"), "\"human\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn current_relation_ddl() {
        let ddl = create_relation(&RelationSchema::current("human"));
        assert_eq!(
            ddl,
            vec![
                "CREATE TABLE \"human\" ( data JSONB NOT NULL )",
                "CREATE UNIQUE INDEX \"human _id\" ON \"human\" ((data->'_id'))",
                "CREATE INDEX \"human gin\" ON \"human\" USING GIN (data jsonb_path_ops)",
                "CREATE INDEX \"human btree\" ON \"human\" USING BTREE (data)",
            ]
        );
    }

    #[test]
    fn history_relation_is_unique_on_id_and_rev() {
        let ddl = create_relation(&RelationSchema::history("human history"));
        assert_eq!(
            ddl[1],
            "CREATE UNIQUE INDEX \"human history _id_rev\" ON \"human history\" ((data->'_id'),(data->'_rev'))"
        );
    }

    #[test]
    fn dml_statements() {
        assert_eq!(
            insert("human"),
            "INSERT INTO \"human\" (data) VALUES ($1) ON CONFLICT DO NOTHING"
        );
        assert_eq!(update("human"), "UPDATE \"human\" SET data = $1 WHERE data @> $2");
        assert_eq!(delete("human"), "DELETE FROM \"human\" WHERE data @> $1");
    }

    #[test]
    fn select_dispatches_on_query_dialect() {
        let relations = vec!["human".to_string()];
        let contains = Query::contains(json!({"year": 1990})).unwrap();
        let path = Query::from("$.year > 1989");
        assert_eq!(
            select(&relations, &contains),
            "SELECT data FROM \"human\" WHERE data @> $1"
        );
        assert_eq!(
            select(&relations, &path),
            "SELECT data FROM \"human\" WHERE data @@ $1::text::jsonpath"
        );
    }

    #[test]
    fn select_unions_relations() {
        let relations = vec!["human".to_string(), "human history".to_string()];
        assert_eq!(
            select(&relations, &Query::from("$.a == 1")),
            "SELECT data FROM \"human\" WHERE data @@ $1::text::jsonpath UNION SELECT data FROM \"human history\" WHERE data @@ $1::text::jsonpath"
        );
    }
}
