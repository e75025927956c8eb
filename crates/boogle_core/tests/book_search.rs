use boogle_core::db::open_pool_in_memory;
use boogle_core::{
    BookId, BookRecord, BookRepository, CallContext, ErrorKind, RepoError, SchemaOptions,
    SearchQuery, SourceId, SqliteBookRepository,
};

fn repo() -> SqliteBookRepository {
    SqliteBookRepository::open(open_pool_in_memory().unwrap(), SchemaOptions::default()).unwrap()
}

fn book(source: &str, book_id: &str, title: Option<&str>, author: Option<&str>) -> BookRecord {
    let mut record = BookRecord::new(
        SourceId::parse(source).unwrap(),
        BookId::parse(book_id).unwrap(),
        format!("https://{source}.example/{book_id}"),
    );
    record.title = title.map(str::to_string);
    record.author = author.map(str::to_string);
    record
}

fn insert_all(repo: &SqliteBookRepository, records: &[BookRecord]) {
    for record in records {
        repo.upsert(record, &CallContext::background()).unwrap();
    }
}

fn search(repo: &SqliteBookRepository, query: SearchQuery) -> Vec<(String, String)> {
    repo.search_books(&query, &CallContext::background())
        .unwrap()
        .into_iter()
        .map(|hit| (hit.source, hit.book_id))
        .collect()
}

#[test]
fn title_match_is_case_insensitive() {
    let repo = repo();
    insert_all(
        &repo,
        &[
            book("gutenberg", "2701", Some("Moby Dick"), Some("Herman Melville")),
            book("gutenberg", "84", Some("Frankenstein"), Some("Mary Shelley")),
        ],
    );

    let expected = vec![("gutenberg".to_string(), "2701".to_string())];
    assert_eq!(search(&repo, SearchQuery::new("moby")), expected);
    assert_eq!(search(&repo, SearchQuery::new("MOBY")), expected);
    assert_eq!(search(&repo, SearchQuery::new("dick")), expected);
}

#[test]
fn hits_carry_title_and_url() {
    let repo = repo();
    insert_all(
        &repo,
        &[book("gutenberg", "2701", Some("Moby Dick"), None)],
    );

    let hits = repo
        .search_books(&SearchQuery::new("moby"), &CallContext::background())
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title.as_deref(), Some("Moby Dick"));
    assert_eq!(hits[0].url, "https://gutenberg.example/2701");
}

#[test]
fn results_are_ordered_by_title_and_capped_by_limit() {
    let repo = repo();
    insert_all(
        &repo,
        &[
            book("gutenberg", "3", Some("Gamma Tales"), None),
            book("gutenberg", "1", Some("Alpha Tales"), None),
            book("gutenberg", "2", Some("Beta Tales"), None),
        ],
    );

    let hits = search(&repo, SearchQuery::new("tales").with_limit(2));

    assert_eq!(
        hits,
        vec![
            ("gutenberg".to_string(), "1".to_string()),
            ("gutenberg".to_string(), "2".to_string()),
        ]
    );
}

#[test]
fn author_substring_matches() {
    let repo = repo();
    insert_all(
        &repo,
        &[
            book("gutenberg", "84", Some("Frankenstein"), Some("Mary Wollstonecraft Shelley")),
            book("gutenberg", "2701", Some("Moby Dick"), Some("Herman Melville")),
        ],
    );

    let hits = search(&repo, SearchQuery::new("wollstonecraft"));

    assert_eq!(hits, vec![("gutenberg".to_string(), "84".to_string())]);
}

#[test]
fn source_filter_restricts_hits() {
    let repo = repo();
    insert_all(
        &repo,
        &[
            book("gutenberg", "84", Some("Frankenstein"), None),
            book("standardebooks", "mary-shelley-frankenstein", Some("Frankenstein"), None),
        ],
    );

    let all = search(&repo, SearchQuery::new("frankenstein"));
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].0, "gutenberg", "ties are broken by source");

    let filtered = search(
        &repo,
        SearchQuery::new("frankenstein").with_source("StandardEbooks"),
    );
    assert_eq!(
        filtered,
        vec![(
            "standardebooks".to_string(),
            "mary-shelley-frankenstein".to_string()
        )]
    );
}

#[test]
fn empty_text_matches_every_row_with_null_title_first() {
    let repo = repo();
    insert_all(
        &repo,
        &[
            book("gutenberg", "2", Some("Beta"), None),
            book("gutenberg", "1", None, Some("Anonymous")),
        ],
    );

    let hits = repo
        .search_books(&SearchQuery::new(""), &CallContext::background())
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].book_id, "1");
    assert!(hits[0].title.is_none());
    assert_eq!(hits[1].title.as_deref(), Some("Beta"));
}

#[test]
fn wildcard_characters_are_matched_literally() {
    let repo = repo();
    insert_all(
        &repo,
        &[
            book("gutenberg", "1", Some("100% Pure"), None),
            book("gutenberg", "2", Some("1000 Pure"), None),
            book("gutenberg", "3", Some("snake_case"), None),
            book("gutenberg", "4", Some("snakeXcase"), None),
        ],
    );

    assert_eq!(
        search(&repo, SearchQuery::new("100%")),
        vec![("gutenberg".to_string(), "1".to_string())]
    );
    assert_eq!(
        search(&repo, SearchQuery::new("e_c")),
        vec![("gutenberg".to_string(), "3".to_string())]
    );
}

#[test]
fn no_match_returns_empty_list() {
    let repo = repo();
    insert_all(&repo, &[book("gutenberg", "84", Some("Frankenstein"), None)]);

    assert!(search(&repo, SearchQuery::new("dracula")).is_empty());
}

#[test]
fn zero_limit_is_invalid_query() {
    let repo = repo();

    let err = repo
        .search_books(
            &SearchQuery::new("moby").with_limit(0),
            &CallContext::background(),
        )
        .unwrap_err();

    assert!(matches!(err, RepoError::InvalidQuery(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn accented_text_matches_in_any_case() {
    let repo = repo();
    insert_all(
        &repo,
        &[
            book("gutenberg", "135", Some("LES MISÉRABLES"), Some("Victor Hugo")),
            book("gutenberg", "1069", Some("Germinal"), Some("Émile Zola")),
        ],
    );

    let hugo = vec![("gutenberg".to_string(), "135".to_string())];
    assert_eq!(search(&repo, SearchQuery::new("misérables")), hugo);
    assert_eq!(search(&repo, SearchQuery::new("MISÉRABLES")), hugo);
    assert_eq!(search(&repo, SearchQuery::new("Misérables")), hugo);

    let zola = vec![("gutenberg".to_string(), "1069".to_string())];
    assert_eq!(search(&repo, SearchQuery::new("émile")), zola);
    assert_eq!(search(&repo, SearchQuery::new("ÉMILE")), zola);
    assert!(search(&repo, SearchQuery::new("emile")).is_empty());
}

#[test]
fn title_order_ignores_case() {
    let repo = repo();
    insert_all(
        &repo,
        &[
            book("gutenberg", "1", Some("Zebra Tales"), None),
            book("gutenberg", "2", Some("apple tales"), None),
            book("gutenberg", "3", Some("Mango Tales"), None),
        ],
    );

    let ids = search(&repo, SearchQuery::new("tales"))
        .into_iter()
        .map(|(_, book_id)| book_id)
        .collect::<Vec<_>>();

    assert_eq!(ids, vec!["2", "3", "1"]);
}
