/// Column aligned table printed by the listing commands
pub struct InfoTable {
    rows: Vec<Vec<String>>,
    sizes: Vec<usize>,
}

impl InfoTable {
    pub fn new(header: Vec<&str>) -> Self {
        Self {
            sizes: header.iter().map(|s| s.len()).collect(),
            rows: vec![header.iter().map(|s| s.to_string()).collect()],
        }
    }

    /// Adds a row, missing cells are left empty and extra ones dropped
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.sizes.len(), String::new());
        for (i, s) in row.iter().enumerate() {
            self.sizes[i] = self.sizes[i].max(s.len());
        }
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render(&self, title: &str) -> String {
        let mut out = String::new();
        if !title.is_empty() {
            out += &format!("{title}\r\n{0:-<1$}\r\n", "-", title.len());
        }

        let mut hdr_len = 0_usize;
        for (i, row) in self.rows.iter().enumerate() {
            let line = self
                .sizes
                .iter()
                .zip(row)
                .map(|(&size, cell)| format!("{0:<1$}", cell, size + 1))
                .collect::<String>();
            let line = line.trim_end();
            out += line;
            out += "\r\n";
            if i == 0 {
                hdr_len = line.len();
                out += &format!("{0:-<1$}\r\n", '-', hdr_len);
            } else if i == self.rows.len() - 1 {
                out += &format!("{0:-<1$}\r\n", '-', hdr_len);
            }
        }
        out
    }

    pub fn print(&self, title: &str) {
        print!("{}", self.render(title));
    }
}
