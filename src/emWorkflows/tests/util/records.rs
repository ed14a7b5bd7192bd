use em_workflows::assets::CallbackRecord;
use em_workflows::executor::JobSummary;


/// the record for the input with this title
pub fn record<'s>(summary: &'s JobSummary, title: &str) -> &'s CallbackRecord {
	summary.records.iter()
		.find(|record| record.title == title)
		.expect(&format!("no record for {}", title))
}


/// asset type names, sorted
pub fn kinds(record: &CallbackRecord) -> Vec<&'static str> {
	let mut kinds = record.assets()
		.map(|asset| asset.kind.name())
		.collect::<Vec<_>>();
	kinds.sort();
	kinds
}


/// Every asset path is relative to the assets root, and names something that got promoted there.
pub fn assert_promoted(record: &CallbackRecord, assets_root: &std::path::Path) {
	for asset in record.assets() {
		assert!(!asset.path.starts_with('/'), "absolute asset path: {}", asset.path);
		assert!(!asset.path.contains("/Projects/"), "asset path under Projects: {}", asset.path);
		assert!(assets_root.join(&asset.path).exists(), "asset wasn't promoted: {}", asset.path);
	}
}
