//! Full LaTeX source: report header, generated body, photo appendix.

use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use tera::{Context, Tera};

use super::log::BodyLocation;
use crate::assemble::{AssembledDocument, LineSpan};
use crate::error::CompileError;
use crate::extract::ExtractedTable;
use crate::latex::escape_latex;
use crate::metadata::ReportMetadata;

/// Line replaced by the rendered body after template expansion.
const BODY_MARKER: &str = "%%LABFORGE-BODY%%";

const MAKEUP_CHECKED: &str = r"$\square$\hspace{-1em}$\surd$";
const MAKEUP_UNCHECKED: &str = r"$\square$";

/// Report template. Values are escaped before rendering; Tera autoescape is off.
pub const REPORT_TEMPLATE: &str = r"\documentclass[UTF8,a4paper,12pt]{ctexart}
\usepackage[margin=2.5cm]{geometry}
\usepackage{amsmath}
\usepackage{amssymb}
\usepackage{graphicx}
\usepackage{float}
\usepackage{array}

\newcommand{\experiName}{ {{- experiment_name -}} }
\newcommand{\supervisor}{ {{- supervisor -}} }
\newcommand{\name}{ {{- name -}} }
\newcommand{\studentNum}{ {{- student_id -}} }
\newcommand{\classNum}{ {{- class_num -}} }
\newcommand{\groupNum}{ {{- group_num -}} }
\newcommand{\seatNum}{ {{- seat_num -}} }
\newcommand{\dateYear}{ {{- year -}} }
\newcommand{\dateMonth}{ {{- month -}} }
\newcommand{\dateDay}{ {{- day -}} }
\newcommand{\room}{ {{- room -}} }
\newcommand{\others}{ {{- makeup -}} }

\begin{document}

\begin{center}
{\LARGE \experiName}
\end{center}

\begin{tabular}{ll}
Name: \name & Student ID: \studentNum \\
Class: \classNum & Group: \groupNum \quad Seat: \seatNum \\
Supervisor: \supervisor & Room: \room \\
Date: \dateYear-\dateMonth-\dateDay & Make-up session: \others \\
\end{tabular}

%%LABFORGE-BODY%%
{% if appendix | length > 0 %}
\clearpage
\appendix
\section{Original records}
{% for image in appendix %}
\begin{figure}[H]
\centering
\includegraphics[width=0.9\textwidth,height=0.8\textheight,keepaspectratio]{ {{- image.path -}} }
\caption{ {{- image.caption -}} }
\end{figure}
{% endfor %}
{% endif %}
\end{document}
";

/// Photograph placed in the appendix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppendixImage {
    /// Path as written into the source (forward slashes).
    pub path: String,
    pub caption: String,
}

impl AppendixImage {
    pub fn new(path: &Path, caption: &str) -> Self {
        Self {
            path: path.to_string_lossy().replace('\\', "/"),
            caption: escape_latex(caption),
        }
    }
}

/// A rendered source file and the position of the generated body in it.
#[derive(Debug, Clone, PartialEq)]
pub struct LatexSource {
    pub text: String,
    /// 1-based source line of the first body line.
    pub body_start_line: usize,
    pub body_line_count: usize,
    /// Line ranges of the body blocks, body-relative.
    pub spans: Vec<LineSpan>,
}

impl LatexSource {
    /// A hand-edited source with no generated body. Every diagnostic on it
    /// classifies as terminal.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            body_start_line: 0,
            body_line_count: 0,
            spans: Vec::new(),
        }
    }

    /// Maps a source line to its body line and originating block.
    ///
    /// Returns `None` for lines outside the body.
    pub fn locate(&self, line: usize) -> Option<BodyLocation> {
        if line < self.body_start_line || line >= self.body_start_line + self.body_line_count {
            return None;
        }
        let body_line = line - self.body_start_line + 1;
        let origin = self
            .spans
            .iter()
            .find(|s| s.start <= body_line && body_line <= s.end)
            .and_then(|s| s.origin);
        Some(BodyLocation { body_line, origin })
    }
}

/// Renders the complete source for an assembled document.
pub fn render_document(
    document: &AssembledDocument,
    tables: &[ExtractedTable],
    metadata: &ReportMetadata,
    appendix: &[AppendixImage],
    workspace: &Path,
    today: NaiveDate,
) -> Result<LatexSource, CompileError> {
    let (year, month, day) = metadata.date_parts(today);

    let mut context = Context::new();
    context.insert("experiment_name", &escape_latex(&metadata.experiment_name));
    context.insert("supervisor", &escape_latex(&metadata.supervisor));
    context.insert("name", &escape_latex(&metadata.name));
    context.insert("student_id", &escape_latex(&metadata.student_id));
    context.insert("class_num", &escape_latex(&metadata.class_num));
    context.insert("group_num", &escape_latex(&metadata.group_num));
    context.insert("seat_num", &escape_latex(&metadata.seat_num));
    context.insert("room", &escape_latex(&metadata.room));
    context.insert("year", &escape_latex(&year));
    context.insert("month", &escape_latex(&month));
    context.insert("day", &escape_latex(&day));
    context.insert(
        "makeup",
        if metadata.is_makeup {
            MAKEUP_CHECKED
        } else {
            MAKEUP_UNCHECKED
        },
    );
    context.insert("appendix", appendix);

    let rendered = Tera::one_off(REPORT_TEMPLATE, &context, false)?;
    let body = document.render_body(tables, workspace);

    let lines: Vec<&str> = rendered.lines().collect();
    let marker = lines
        .iter()
        .position(|l| l.trim() == BODY_MARKER)
        .ok_or_else(|| CompileError::Template(tera::Error::msg("report template has no body marker")))?;

    let mut text = lines[..marker].join("\n");
    text.push('\n');
    text.push_str(&body.text);
    text.push('\n');
    text.push_str(&lines[marker + 1..].join("\n"));
    text.push('\n');

    Ok(LatexSource {
        text,
        body_start_line: marker + 1,
        body_line_count: body.line_count(),
        spans: body.spans,
    })
}
