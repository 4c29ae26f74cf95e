use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use discover_compiler::{
    parse_arithmetic_default, DatasetConfig, FilterCompiler, FilterParams, QueryItem, SearchTerm, SqlCompiler,
    StaticResolver,
};

const DATASET_CONFIG_PATH: &str = "dataset.json";

const HELP: &str = "\
commands:
  eq <equation>         parse an arithmetic equation, e.g. eq spans.http + spans.db * 2
  filter <json terms>   compile a list of search terms
  query <json items>    compile a boolean query (terms, \"and\", \"or\", groups)
  params <json>         replace the request params
  help                  show this message
  quit                  leave the shell";

/// 加载数据集映射，优先使用 `dataset.json`，失败时使用内置配置
fn load_dataset_config() -> DatasetConfig {
    match DatasetConfig::from_json_file(DATASET_CONFIG_PATH) {
        Ok(config) => {
            info!(path = DATASET_CONFIG_PATH, columns = config.columns.len(), "loaded dataset config");
            config
        }
        Err(e) => {
            warn!(error = %e, "using the built-in dataset config");
            DatasetConfig::discover()
        }
    }
}

/// 交互环境使用的内存解析器
fn demo_resolver() -> StaticResolver {
    StaticResolver::new()
        .with_project("backend", 1)
        .with_project("frontend", 2)
        .with_issue("BACKEND-1", 100)
        .with_latest_release("1.0.0")
}

struct Shell<'a> {
    compiler: FilterCompiler<'a>,
    sql: SqlCompiler,
    params: FilterParams,
}

impl Shell<'_> {
    fn run(&mut self, line: &str) -> Result<()> {
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();

        match command {
            "eq" => {
                let tree = parse_arithmetic_default(rest)?;
                println!("{}", tree);
                println!("operators: {}, fields: {:?}", tree.operator_count(), tree.field_refs());
            }
            "filter" => {
                let terms: Vec<SearchTerm> = serde_json::from_str(rest).context("search terms must be a JSON list")?;
                let compiled = self.compiler.compile(&terms, &self.params)?;
                self.print(&compiled)?;
            }
            "query" => {
                let items: Vec<QueryItem> = serde_json::from_str(rest).context("query items must be a JSON list")?;
                let compiled = self.compiler.compile_query(&items, &self.params)?;
                self.print(&compiled)?;
            }
            "params" => {
                let params: FilterParams = serde_json::from_str(rest).context("invalid params")?;
                params.validate()?;
                self.params = params;
                println!("{}", serde_json::to_string(&self.params)?);
            }
            "help" => println!("{}", HELP),
            other => println!("unknown command `{}`, try `help`", other),
        }
        Ok(())
    }

    fn print(&self, compiled: &discover_compiler::CompiledFilter) -> Result<()> {
        for condition in &compiled.conditions {
            println!("  {}", condition);
        }
        println!("{}", self.sql.compile_filter(compiled)?);
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // 1. 解析器与编译器
    let resolver = demo_resolver();
    let mut shell = Shell {
        compiler: FilterCompiler::with_config(load_dataset_config(), &resolver),
        sql: SqlCompiler::new("events"),
        params: FilterParams::new(1, vec![1, 2]),
    };

    // 2. 交互循环
    let mut editor = DefaultEditor::new()?;
    println!("discover query compiler, `help` lists the commands");

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor.add_history_entry(line)?;
                if matches!(line, "quit" | "exit") {
                    break;
                }
                if let Err(e) = shell.run(line) {
                    println!("error: {:#}", e);
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
