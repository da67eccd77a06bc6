/// Per-run tallies, logged at the end of every run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub articles_in: u32,
    pub articles_new: u32,
    pub already_processed: u32,
    pub classified_relevant: u32,
    pub classified_irrelevant: u32,
    pub rejected: u32,
    pub incidents_created: u32,
    pub updates_created: u32,
    pub duplicates_skipped: u32,
    pub classifier_fallbacks: u32,
    pub errors: u32,
    pub interrupted: bool,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Breach Scout Run Complete ===")?;
        writeln!(f, "Articles in:          {}", self.articles_in)?;
        writeln!(f, "Articles new:         {}", self.articles_new)?;
        writeln!(f, "Already processed:    {}", self.already_processed)?;
        writeln!(f, "Classified relevant:  {}", self.classified_relevant)?;
        writeln!(f, "Classified irrelevant: {}", self.classified_irrelevant)?;
        writeln!(f, "Rejected (invalid):   {}", self.rejected)?;
        writeln!(f, "\nOutcomes:")?;
        writeln!(f, "  New incidents:      {}", self.incidents_created)?;
        writeln!(f, "  Updates:            {}", self.updates_created)?;
        writeln!(f, "  Duplicates skipped: {}", self.duplicates_skipped)?;
        writeln!(f, "\nClassifier fallbacks: {}", self.classifier_fallbacks)?;
        write!(f, "Errors:               {}", self.errors)?;
        if self.interrupted {
            write!(f, "\n(interrupted before all articles were processed)")?;
        }
        Ok(())
    }
}
