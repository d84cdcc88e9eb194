//! The `profile` management command.
//!
//! A micro-benchmark over an in-memory SQLite database with a `user` table
//! and a `tweet` table referencing it. Each phase is timed and reported.
//! Phases run in a fixed order: insert, update, select, tuples, dicts, get,
//! joins, join_agg, prefetch, delete.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tessera_core::{DatabaseSettings, Settings, TesseraError, TesseraResult};
use tessera_db::{
    ColumnDef, ColumnType, Database, DeleteOptions, Filter, Instance, TableDef, Value,
};
use tracing::info;

use crate::command::ManagementCommand;

/// The benchmark tables.
pub fn profile_tables() -> Vec<TableDef> {
    vec![
        TableDef::with_auto_id("user")
            .column(ColumnDef::new("username", ColumnType::Char).max_length(255).unique()),
        TableDef::with_auto_id("tweet")
            .column(ColumnDef::foreign_key("user_id", "user"))
            .column(ColumnDef::new("content", ColumnType::Text).default_value(""))
            .column(ColumnDef::new("timestamp", ColumnType::DateTime).default_now()),
    ]
}

/// Which phases run. Rows are always created first so later phases have
/// data; only a selected insert phase is timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProfileOptions {
    pub number: usize,
    pub insert: bool,
    pub update: bool,
    pub select: bool,
    pub tuples: bool,
    pub dicts: bool,
    pub get: bool,
    pub joins: bool,
    pub join_agg: bool,
    pub prefetch: bool,
    pub delete: bool,
}

impl ProfileOptions {
    /// Every phase over `number` users.
    pub const fn all(number: usize) -> Self {
        Self {
            number,
            insert: true,
            update: true,
            select: true,
            tuples: true,
            dicts: true,
            get: true,
            joins: true,
            join_agg: true,
            prefetch: true,
            delete: true,
        }
    }

    /// No timed phases; only the initial rows are created.
    pub const fn none(number: usize) -> Self {
        Self {
            number,
            insert: false,
            update: false,
            select: false,
            tuples: false,
            dicts: false,
            get: false,
            joins: false,
            join_agg: false,
            prefetch: false,
            delete: false,
        }
    }
}

/// One finished phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseStats {
    pub name: &'static str,
    pub elapsed: Duration,
    /// Rows written or read by the phase.
    pub rows: usize,
}

impl PhaseStats {
    /// Mean time per row, or zero when the phase touched no rows.
    pub fn per_row(&self) -> Duration {
        u32::try_from(self.rows)
            .ok()
            .filter(|rows| *rows > 0)
            .map_or(Duration::ZERO, |rows| self.elapsed / rows)
    }
}

/// Order of the detailed `--print` listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProfileSort {
    /// Run order.
    Order,
    /// Slowest phase first.
    #[default]
    Elapsed,
    /// Alphabetical by phase name.
    Name,
    /// Most rows first.
    Rows,
}

impl ProfileSort {
    pub const NAMES: [&'static str; 5] = ["order", "elapsed", "cumtime", "name", "rows"];

    /// Parses a sort key. `cumtime` is accepted as an alias of `elapsed`.
    pub fn from_name(name: &str) -> TesseraResult<Self> {
        match name {
            "order" => Ok(Self::Order),
            "elapsed" | "cumtime" => Ok(Self::Elapsed),
            "name" => Ok(Self::Name),
            "rows" => Ok(Self::Rows),
            other => Err(TesseraError::ConfigurationError(format!(
                "Unknown profile sort key '{other}', expected one of {}",
                Self::NAMES.join(", ")
            ))),
        }
    }
}

/// The phases that ran, in run order.
#[derive(Debug, Clone, Default)]
pub struct ProfileReport {
    pub phases: Vec<PhaseStats>,
}

impl ProfileReport {
    pub fn get(&self, phase: &str) -> Option<&PhaseStats> {
        self.phases.iter().find(|stats| stats.name == phase)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.phases.iter().map(|stats| stats.name).collect()
    }

    pub fn total(&self) -> Duration {
        self.phases.iter().map(|stats| stats.elapsed).sum()
    }

    /// The phases ordered by `sort`. Ties keep run order.
    pub fn sorted(&self, sort: ProfileSort) -> Vec<&PhaseStats> {
        let mut phases: Vec<&PhaseStats> = self.phases.iter().collect();
        match sort {
            ProfileSort::Order => {}
            ProfileSort::Elapsed => phases.sort_by(|a, b| b.elapsed.cmp(&a.elapsed)),
            ProfileSort::Name => phases.sort_by_key(|stats| stats.name),
            ProfileSort::Rows => phases.sort_by(|a, b| b.rows.cmp(&a.rows)),
        }
        phases
    }

    /// One line per phase in run order.
    pub fn summary_lines(&self) -> Vec<String> {
        self.phases
            .iter()
            .map(|stats| format!("{:<9} {:>10.3} ms", stats.name, millis(stats.elapsed)))
            .collect()
    }

    /// A table of every phase with row counts, ordered by `sort`.
    pub fn detail_lines(&self, sort: ProfileSort) -> Vec<String> {
        let mut lines = vec![
            format!("{:<9} {:>12} {:>8} {:>12}", "phase", "elapsed ms", "rows", "us/row"),
            "-".repeat(44),
        ];
        for stats in self.sorted(sort) {
            lines.push(format!(
                "{:<9} {:>12.3} {:>8} {:>12.3}",
                stats.name,
                millis(stats.elapsed),
                stats.rows,
                stats.per_row().as_secs_f64() * 1_000_000.0
            ));
        }
        lines.push("-".repeat(44));
        lines.push(format!("{:<9} {:>12.3}", "total", millis(self.total())));
        lines
    }

    fn record(&mut self, name: &'static str, started: Instant, rows: usize) {
        let elapsed = started.elapsed();
        info!(phase = name, rows, elapsed_ms = millis(elapsed), "Profile phase finished");
        self.phases.push(PhaseStats { name, elapsed, rows });
    }
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

fn username(idx: usize) -> String {
    format!("user-{idx}")
}

async fn create_rows(db: &Database, n: usize) -> TesseraResult<()> {
    for idx in 0..n {
        let user = db.insert("user", &[("username", username(idx).into())]).await?;
        let user_id = user.pk().cloned().unwrap_or(Value::Null);
        db.insert("tweet", &[("user_id", user_id)]).await?;
    }
    Ok(())
}

/// Every user as a positional tuple of column values.
async fn user_tuples(db: &Database) -> TesseraResult<Vec<Vec<Value>>> {
    let mut cursor = db.execute_sql("SELECT * FROM \"user\"", &[], true).await?;
    Ok(cursor
        .fetch_all()
        .into_iter()
        .map(|row| row.values().to_vec())
        .collect())
}

/// Every user as a column-name map.
async fn user_dicts(db: &Database) -> TesseraResult<Vec<HashMap<String, Value>>> {
    let mut cursor = db.execute_sql("SELECT * FROM \"user\"", &[], true).await?;
    Ok(cursor
        .fetch_all()
        .into_iter()
        .map(|row| row.into_pairs().into_iter().collect())
        .collect())
}

/// `(tweet id, author username)` for every tweet, through an inner join.
async fn tweet_authors(db: &Database) -> TesseraResult<Vec<(i64, String)>> {
    let mut cursor = db
        .execute_sql(
            "SELECT \"tweet\".\"id\" AS \"tweet_id\", \"user\".\"username\" AS \"username\" \
             FROM \"tweet\" INNER JOIN \"user\" ON \"tweet\".\"user_id\" = \"user\".\"id\"",
            &[],
            true,
        )
        .await?;
    cursor
        .fetch_all()
        .into_iter()
        .map(|row| Ok((row.get("tweet_id")?, row.get("username")?)))
        .collect()
}

/// Each user with the ids of their tweets, folded from one left outer
/// join. Users without tweets get an empty list.
async fn users_with_tweet_ids(db: &Database) -> TesseraResult<Vec<(i64, Vec<i64>)>> {
    let mut cursor = db
        .execute_sql(
            "SELECT \"user\".\"id\" AS \"user_id\", \"tweet\".\"id\" AS \"tweet_id\" \
             FROM \"user\" LEFT OUTER JOIN \"tweet\" ON \"tweet\".\"user_id\" = \"user\".\"id\" \
             ORDER BY \"user\".\"id\", \"tweet\".\"id\"",
            &[],
            true,
        )
        .await?;
    let mut users: Vec<(i64, Vec<i64>)> = Vec::new();
    for row in cursor.fetch_all() {
        let user_id: i64 = row.get("user_id")?;
        let tweet_id: Option<i64> = row.get("tweet_id")?;
        match users.last_mut() {
            Some((last, tweets)) if *last == user_id => tweets.extend(tweet_id),
            _ => users.push((user_id, tweet_id.into_iter().collect())),
        }
    }
    Ok(users)
}

/// Every user paired with their tweets, from two selects stitched on
/// `tweet.user_id`.
async fn prefetch_tweets(db: &Database) -> TesseraResult<Vec<(Instance, Vec<Instance>)>> {
    let users = db.select("user", &[]).await?;
    let mut by_user: HashMap<i64, Vec<Instance>> = HashMap::new();
    for tweet in db.select("tweet", &[]).await? {
        by_user.entry(tweet.get_as("user_id")?).or_default().push(tweet);
    }
    users
        .into_iter()
        .map(|user| {
            let id: i64 = user.get_as("id")?;
            let tweets = by_user.remove(&id).unwrap_or_default();
            Ok((user, tweets))
        })
        .collect()
}

/// Creates the tables on `db` and runs the selected phases.
pub async fn run_profile(db: &Database, options: ProfileOptions) -> TesseraResult<ProfileReport> {
    let mut report = ProfileReport::default();
    let n = options.number;
    db.create_tables(&profile_tables(), true).await?;

    let started = Instant::now();
    create_rows(db, n).await?;
    if options.insert {
        report.record("insert", started, n);
    }

    if options.update {
        let started = Instant::now();
        for idx in 0..n {
            db.execute_sql(
                "UPDATE \"user\" SET \"username\" = UPPER(\"username\") WHERE \"username\" = ?",
                &[Value::from(username(idx))],
                true,
            )
            .await?;
        }
        report.record("update", started, n);
        db.execute_sql("DELETE FROM \"tweet\"", &[], true).await?;
        db.execute_sql("DELETE FROM \"user\"", &[], true).await?;
        create_rows(db, n).await?;
    }

    if options.select {
        let started = Instant::now();
        let users = db.select("user", &[]).await?;
        report.record("select", started, users.len());
    }

    if options.tuples {
        let started = Instant::now();
        let rows = user_tuples(db).await?;
        report.record("tuples", started, rows.len());
    }

    if options.dicts {
        let started = Instant::now();
        let rows = user_dicts(db).await?;
        report.record("dicts", started, rows.len());
    }

    if options.get {
        let started = Instant::now();
        for idx in 0..n {
            db.get("user", &[Filter::eq("username", username(idx))]).await?;
        }
        report.record("get", started, n);
    }

    if options.joins {
        let started = Instant::now();
        let rows = tweet_authors(db).await?;
        report.record("joins", started, rows.len());
    }

    if options.join_agg {
        let started = Instant::now();
        let users = users_with_tweet_ids(db).await?;
        report.record("join_agg", started, users.len());
    }

    if options.prefetch {
        let started = Instant::now();
        let users = prefetch_tweets(db).await?;
        let rows = users.iter().map(|(_, tweets)| 1 + tweets.len()).sum();
        report.record("prefetch", started, rows);
    }

    if options.delete {
        let started = Instant::now();
        let mut deleted = 0;
        for tweet in db.select("tweet", &[]).await? {
            let cascade = db.delete_instance(&tweet, DeleteOptions::recursive()).await?;
            deleted += usize::try_from(cascade.total_deleted()).unwrap_or(usize::MAX);
        }
        report.record("delete", started, deleted);
    }

    Ok(report)
}

/// Phase flags as `(name, short)`.
const PHASE_FLAGS: [(&str, char); 10] = [
    ("insert", 'i'),
    ("update", 'u'),
    ("select", 's'),
    ("tuples", 'z'),
    ("dicts", 'x'),
    ("get", 'g'),
    ("joins", 'j'),
    ("join_agg", 'w'),
    ("prefetch", 'f'),
    ("delete", 'd'),
];

/// Runs the benchmark and prints one line per phase.
pub struct ProfileCommand;

impl ProfileCommand {
    fn options(matches: &clap::ArgMatches) -> ProfileOptions {
        let number = matches.get_one::<usize>("number").copied().unwrap_or(1000);
        let all = matches.get_flag("all");
        let on = |name: &str| all || matches.get_flag(name);
        ProfileOptions {
            number,
            insert: on("insert"),
            update: on("update"),
            select: on("select"),
            tuples: on("tuples"),
            dicts: on("dicts"),
            get: on("get"),
            joins: on("joins"),
            join_agg: on("join_agg"),
            prefetch: on("prefetch"),
            delete: on("delete"),
        }
    }
}

#[async_trait]
impl ManagementCommand for ProfileCommand {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn help(&self) -> &'static str {
        "Time inserts, updates, selects, joins, prefetches and cascade deletes on in-memory SQLite"
    }

    fn add_arguments(&self, cmd: clap::Command) -> clap::Command {
        let mut cmd = cmd
            .arg(
                clap::Arg::new("number")
                    .short('n')
                    .long("number")
                    .default_value("1000")
                    .value_parser(clap::value_parser!(usize))
                    .help("Number of users (each with one tweet)"),
            )
            .arg(
                clap::Arg::new("print")
                    .short('p')
                    .long("print")
                    .action(clap::ArgAction::SetTrue)
                    .help("Print a detailed table with row counts"),
            )
            .arg(
                clap::Arg::new("sorting")
                    .long("sorting")
                    .default_value("elapsed")
                    .value_parser(ProfileSort::NAMES)
                    .help("Order of the --print table"),
            );
        for (name, short) in PHASE_FLAGS.into_iter().chain([("all", 'a')]) {
            cmd = cmd.arg(
                clap::Arg::new(name)
                    .short(short)
                    .long(name)
                    .action(clap::ArgAction::SetTrue),
            );
        }
        cmd
    }

    async fn handle(&self, matches: &clap::ArgMatches, _settings: &Settings) -> TesseraResult<()> {
        let options = Self::options(matches);
        let sort = matches
            .get_one::<String>("sorting")
            .map_or(Ok(ProfileSort::default()), |name| ProfileSort::from_name(name))?;

        let db = tessera_db_backends::connect(&DatabaseSettings::sqlite_memory())?;
        let report = run_profile(&db, options).await?;
        db.close().await?;
        let lines = if matches.get_flag("print") {
            report.detail_lines(sort)
        } else {
            report.summary_lines()
        };
        for line in lines {
            println!("{line}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_db() -> Database {
        tessera_db_backends::connect(&DatabaseSettings::sqlite_memory()).unwrap()
    }

    fn stats(name: &'static str, millis: u64, rows: usize) -> PhaseStats {
        PhaseStats {
            name,
            elapsed: Duration::from_millis(millis),
            rows,
        }
    }

    #[tokio::test]
    async fn test_all_phases_run_in_order() {
        let db = memory_db().await;
        let report = run_profile(&db, ProfileOptions::all(5)).await.unwrap();
        assert_eq!(
            report.names(),
            vec![
                "insert", "update", "select", "tuples", "dicts", "get", "joins", "join_agg",
                "prefetch", "delete"
            ]
        );
        for phase in ["select", "tuples", "dicts", "get", "joins", "join_agg"] {
            assert_eq!(report.get(phase).unwrap().rows, 5, "{phase}");
        }
        assert_eq!(report.get("prefetch").unwrap().rows, 10);
        assert_eq!(report.get("delete").unwrap().rows, 5);

        assert_eq!(db.count("tweet", &[]).await.unwrap(), 0);
        assert_eq!(db.count("user", &[]).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_no_phases_still_creates_rows() {
        let db = memory_db().await;
        let report = run_profile(&db, ProfileOptions::none(3)).await.unwrap();
        assert!(report.phases.is_empty());
        assert_eq!(db.count("tweet", &[]).await.unwrap(), 3);
        let tweet = db.get("tweet", &[Filter::eq("user_id", 2)]).await.unwrap();
        assert_eq!(tweet.get_as::<String>("content").unwrap(), "");
    }

    #[tokio::test]
    async fn test_update_phase_uppercases_then_recreates() {
        let db = memory_db().await;
        let options = ProfileOptions {
            update: true,
            get: true,
            ..ProfileOptions::none(2)
        };
        let report = run_profile(&db, options).await.unwrap();
        assert_eq!(report.names(), vec!["update", "get"]);
        assert_eq!(db.count("user", &[Filter::eq("username", "USER-0")]).await.unwrap(), 0);
        assert_eq!(db.count("user", &[]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tuples_and_dicts_read_every_column() {
        let db = memory_db().await;
        run_profile(&db, ProfileOptions::none(2)).await.unwrap();

        let tuples = user_tuples(&db).await.unwrap();
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0], vec![Value::Int(1), Value::from("user-0")]);

        let dicts = user_dicts(&db).await.unwrap();
        assert_eq!(dicts[1].get("username"), Some(&Value::from("user-1")));
        assert_eq!(dicts[1].get("id"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_joins_and_aggregation() {
        let db = memory_db().await;
        run_profile(&db, ProfileOptions::none(2)).await.unwrap();
        db.insert("tweet", &[("user_id", Value::Int(1))]).await.unwrap();
        let lonely = db.insert("user", &[("username", "lonely".into())]).await.unwrap();

        let mut authors = tweet_authors(&db).await.unwrap();
        authors.sort_unstable();
        assert_eq!(
            authors,
            vec![
                (1, "user-0".to_string()),
                (2, "user-1".to_string()),
                (3, "user-0".to_string())
            ]
        );

        let users = users_with_tweet_ids(&db).await.unwrap();
        assert_eq!(users, vec![(1, vec![1, 3]), (2, vec![2]), (3, vec![])]);
        assert_eq!(lonely.pk(), Some(&Value::Int(3)));
    }

    #[tokio::test]
    async fn test_prefetch_groups_tweets_by_user() {
        let db = memory_db().await;
        run_profile(&db, ProfileOptions::none(2)).await.unwrap();
        db.insert("tweet", &[("user_id", Value::Int(2)), ("content", "again".into())])
            .await
            .unwrap();

        let users = prefetch_tweets(&db).await.unwrap();
        let counts: Vec<(String, usize)> = users
            .iter()
            .map(|(user, tweets)| (user.get_as::<String>("username").unwrap(), tweets.len()))
            .collect();
        assert_eq!(counts, vec![("user-0".to_string(), 1), ("user-1".to_string(), 2)]);
        assert_eq!(users[1].1[1].get_as::<String>("content").unwrap(), "again");
    }

    #[test]
    fn test_sorted_report() {
        let report = ProfileReport {
            phases: vec![stats("select", 5, 10), stats("get", 20, 10), stats("dicts", 5, 30)],
        };
        let names = |sort| -> Vec<&str> { report.sorted(sort).iter().map(|s| s.name).collect() };
        assert_eq!(names(ProfileSort::Order), ["select", "get", "dicts"]);
        assert_eq!(names(ProfileSort::Elapsed), ["get", "select", "dicts"]);
        assert_eq!(names(ProfileSort::Name), ["dicts", "get", "select"]);
        assert_eq!(names(ProfileSort::Rows), ["dicts", "select", "get"]);
        assert_eq!(report.total(), Duration::from_millis(30));
        assert_eq!(report.get("get").unwrap().per_row(), Duration::from_millis(2));
        assert_eq!(stats("delete", 5, 0).per_row(), Duration::ZERO);
    }

    #[test]
    fn test_report_lines() {
        let report = ProfileReport {
            phases: vec![stats("select", 5, 10), stats("get", 20, 10)],
        };
        assert_eq!(report.summary_lines()[0], "select         5.000 ms");

        let detail = report.detail_lines(ProfileSort::Elapsed);
        assert!(detail[0].starts_with("phase"));
        assert!(detail[2].starts_with("get"));
        assert!(detail[3].starts_with("select"));
        assert!(detail.last().unwrap().starts_with("total"));
        assert!(detail.last().unwrap().contains("25.000"));
    }

    #[test]
    fn test_sort_names() {
        assert_eq!(ProfileSort::from_name("cumtime").unwrap(), ProfileSort::Elapsed);
        assert_eq!(ProfileSort::from_name("order").unwrap(), ProfileSort::Order);
        for name in ProfileSort::NAMES {
            assert!(ProfileSort::from_name(name).is_ok());
        }
        assert!(matches!(
            ProfileSort::from_name("tottime"),
            Err(TesseraError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_arguments() {
        let cmd = ProfileCommand;
        let matches = cmd
            .add_arguments(clap::Command::new("profile"))
            .try_get_matches_from(["profile", "-n", "10", "--get", "-d", "-z", "-w", "-p"])
            .unwrap();
        let options = ProfileCommand::options(&matches);
        assert_eq!(
            options,
            ProfileOptions {
                get: true,
                delete: true,
                tuples: true,
                join_agg: true,
                ..ProfileOptions::none(10)
            }
        );
        assert!(matches.get_flag("print"));
        assert_eq!(matches.get_one::<String>("sorting").map(String::as_str), Some("elapsed"));

        let matches = cmd
            .add_arguments(clap::Command::new("profile"))
            .try_get_matches_from(["profile", "-a", "--sorting", "name"])
            .unwrap();
        assert_eq!(ProfileCommand::options(&matches), ProfileOptions::all(1000));
        assert_eq!(matches.get_one::<String>("sorting").map(String::as_str), Some("name"));

        assert!(cmd
            .add_arguments(clap::Command::new("profile"))
            .try_get_matches_from(["profile", "--sorting", "bogus"])
            .is_err());
    }
}
