// apps/ag_cli/src/writer.rs

//! JSON 结果文件

use ag_foundation::error::{AgError, AgResult};
use ag_physics::{CellRecord, Outputter};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Serialize)]
struct ResultsFile<'a> {
    created: String,
    population_columns: &'a [String],
    cells: &'a [CellRecord],
}

/// 把输出记录写成一个 JSON 文件
#[derive(Debug)]
pub struct JsonOutputter {
    path: PathBuf,
    created: DateTime<Local>,
}

impl JsonOutputter {
    /// 在目录下创建 `results_<时间戳>.json`
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        let created = Local::now();
        let name = format!("results_{}.json", created.format("%Y%m%d_%H%M%S"));
        Self {
            path: directory.into().join(name),
            created,
        }
    }

    /// 目标文件
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Outputter for JsonOutputter {
    fn output(&mut self, columns: &[String], records: &[CellRecord]) -> AgResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| AgError::io_with_source(format!("创建目录失败: {}", dir.display()), e))?;
        }
        let file = File::create(&self.path)
            .map_err(|e| AgError::io_with_source(format!("创建文件失败: {}", self.path.display()), e))?;
        let results = ResultsFile {
            created: self.created.to_rfc3339(),
            population_columns: columns,
            cells: records,
        };
        serde_json::to_writer_pretty(BufWriter::new(file), &results).map_err(std::io::Error::from)?;
        tracing::info!("结果写入 {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_grid::Rect;
    use std::collections::BTreeMap;

    #[test]
    fn test_write_results() {
        let dir = std::env::temp_dir().join(format!("ag_cli_writer_{}", std::process::id()));
        let mut writer = JsonOutputter::new(&dir);
        let record = CellRecord {
            index: 0,
            layer: 0,
            rect: Rect::new(0.0, 0.0, 10.0, 10.0),
            z_bottom: 0.0,
            dz: 50.0,
            cf: vec![1.0; 9],
            values: BTreeMap::from([("TotalPM25".to_string(), 3.5)]),
            population: vec![12.0],
            mortality_rate: 800.0,
        };
        writer.output(&["TotalPop".to_string()], &[record]).unwrap();

        let content = std::fs::read_to_string(writer.path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["cells"][0]["values"]["TotalPM25"], 3.5);
        assert_eq!(parsed["population_columns"][0], "TotalPop");
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
