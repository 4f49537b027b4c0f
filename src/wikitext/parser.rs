//! A parsing expression grammar for wikitext documents.
//!
//! The grammar follows the shape of the Parsoid wikitext PEG
//! (<https://github.com/wikimedia/mediawiki-services-parsoid>), reduced to
//! the constructs this converter renders. It produces a pretty flat
//! [`Fragment`] tree; XML-ish tags come out as sentinel nodes carrying
//! `_parsestart`/`_parseend` marker attributes because matching them is
//! not possible at parse time.
//!
//! Context sensitivity lives in two places: the [`State`] threaded through
//! the rules, and the [`inline_breaks_at`] predicate, which decides at
//! each stop character whether the current inline production terminates.

use super::{
    concat,
    config::{contains_ignore_case, is_html_tag, VOID_TAGS},
    state::{State, Tag},
    title_to_url,
    tokens::{PARSE_END, PARSE_START},
    Attribute, Converter, Element, Fragment,
};
use peg::RuleResult;
use regex::Regex;
use std::sync::LazyLock;

/// Characters that cannot appear in a plain text run because they may
/// start a construct or terminate the enclosing production.
const STOP_CHAR: &str = "'&<[{]}|!=:;\r\n";

/// Matches the rest of a line after the first closing `=` of a heading:
/// more `=`, whitespace, and comments are all legal before the newline.
static HEADING_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^=*(?:[ \t]|<!--.*-->)*(?:[\r\n]|$)").unwrap());

peg::parser! { pub(super) grammar wikitext(cx: &Converter<'_>) for str {
    /// The top-level start rule: blocks separated by blank lines.
    pub rule document() -> Vec<Fragment>
    = st:({ State::default() })
      blocks:(
          b:block(&st) { Some(b) }
        / newline() { None }
      )*
      eof()
    { blocks.into_iter().flatten().collect() }

    /// A block item, anchored to the start of a line.
    rule block(st: &State) -> Fragment
    = live()
      b:(
          heading(st)
        / list_block(st)
        / hr()
        / table(st)
        / paragraph(st)
      )
    { b }

    /// Fails the parse once the caller's deadline has cancelled it. The
    /// engine re-checks at every block entry.
    rule live()
    = {? if cx.cancelled() { Err("cancelled") } else { Ok(()) } }

    ///////////////////////
    // Block-level items //
    ///////////////////////

    /// A heading. The level comes from the shorter run of `=`; surplus
    /// markers decay into heading text.
    ///
    /// ```wikitext
    /// =h1=
    /// == h2 ==
    /// ```
    rule heading(st: &State) -> Fragment
    = &"="
      open:$("="+)
      content:inlineline(&st.incremented(Tag::H))?
      close:$("="+)
      (space() {} / comment() {})*
      &eolf()
    { heading_fragment(open, content, close) }

    /// A horizontal rule.
    rule hr() -> Fragment
    = "----" "-"*
    { Fragment::Node(Element::new("hr")) }

    /// A run of list item lines. The separating newlines stay in the
    /// output as text between the items.
    rule list_block(st: &State) -> Fragment
    = items:list_item(st) ++ newline()
    {
        let mut out = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            if index > 0 {
                out.push(Fragment::text("\n"));
            }
            out.push(item);
        }
        Fragment::Seq(out)
    }

    /// A single list item line.
    ///
    /// ```wikitext
    /// * Unordered
    /// # Ordered
    /// ; Term : Detail
    /// : Detail
    /// ```
    rule list_item(st: &State) -> Fragment
    = dtdd(st)
    / indent(st)
    / li(st)

    /// An unordered or ordered list item.
    rule li(st: &State) -> Fragment
    = ['*'|'#']+
      content:inlineline(st)?
      &eolf()
    { element("li", content.unwrap_or_default()) }

    /// A definition list item. The term is parsed with the `colon`
    /// counter raised so a bare `:` terminates it.
    rule dtdd(st: &State) -> Fragment
    = ";"
      term:inlineline(&st.incremented(Tag::Colon))?
      detail:(":" d:inlineline(st)? { d.unwrap_or_default() })?
      &eolf()
    {
        let mut out = vec![element("dt", term.unwrap_or_default())];
        if let Some(detail) = detail {
            out.push(element("dd", detail));
        }
        Fragment::Seq(out)
    }

    /// An indentation item.
    rule indent(st: &State) -> Fragment
    = ":"+
      content:inlineline(st)?
      &eolf()
    { element("dd", content.unwrap_or_default()) }

    /// A paragraph: one or more inline lines that do not open another
    /// block. Text, wikilink, and template led lines get the `<p>`
    /// wrapper; lines led by some other element (a text style, an
    /// external link, a tag token) are emitted bare.
    rule paragraph(st: &State) -> Fragment
    = first:inlineline(st)
      rest:(newline() !block_prefix() l:inlineline(st) { l })*
    {
        let mut children = first;
        for line in rest {
            children.push(Fragment::text("\n"));
            children.extend(line);
        }
        paragraph_fragment(children)
    }

    /// A lookahead for line starts that belong to a non-paragraph block.
    rule block_prefix()
    = ['='|'*'|'#'|';'|':'] / "----" / "{|"

    /////////////////
    // Inline flow //
    /////////////////

    /// A run of inline content, stopping wherever the current production's
    /// terminator appears.
    rule inlineline(st: &State) -> Vec<Fragment>
    = t:(
        !inline_breaks(st)
        e:inline_element(st)
        { e }
      )+
    { t }

    /// A single inline item: a construct, a text run, or one literal
    /// character of something that failed to be a construct.
    rule inline_element(st: &State) -> Fragment
    = &"<" t:angle_bracket_markup(st) { t }
    / &"{{" t:template_or_text(st) { t }
    / &"[[" t:wikilink(st) { t }
    / &"[" t:extlink(st) { t }
    / &"'" t:quoted(st) { t }
    / &"&" t:html_entity() { t }
    / t:$(text_char()+) { Fragment::text(t) }
    / !newline() t:$([_]) { Fragment::text(t) }

    /// Plain text characters.
    rule text_char() = [c if !STOP_CHAR.contains(c)]

    /// A lookahead that matches if the input is at a terminator for
    /// whatever inline item is currently being parsed, according to `st`.
    rule inline_breaks(st: &State)
    = &['='|'|'|'!'|'{'|'}'|':'|';'|'\r'|'\n'|'['|']'|'<'|'-']
      #{|input, pos| inline_breaks_at(input, pos, st)}

    ///////////////
    // Templates //
    ///////////////

    /// A template, template parameter, or literal `{{` when unterminated.
    rule template_or_text(st: &State) -> Fragment
    = &"{{{" t:template_param(st) { t }
    / template(st)
    / t:$("{{") { Fragment::text(t) }

    /// A template substitution.
    ///
    /// ```wikitext
    /// {{Template name|numbered argument|key=value}}
    /// ```
    ///
    /// The target and arguments are parsed with the template depth raised
    /// and `}}` registered as the closing delimiter, then handed to the
    /// caller's template handler for expansion.
    rule template(st: &State) -> Fragment
    = stt:({ st.incremented(Tag::TemplateDepth).pushed_str(Tag::Preproc, "}}") })
      "{{"
      target:template_target(&stt)
      args:("|" a:template_arg(&stt) { a })*
      "}}"
    { cx.expand_template(&target, &args) }

    /// The template target: everything up to the first `|` or the closing
    /// `}}`.
    rule template_target(stt: &State) -> String
    = t:template_text(&stt.pushed(Tag::TemplateArg, true))
    {?
        let target = concat(&t);
        let target = target.trim();
        if target.is_empty() { Err("template target") } else { Ok(target.to_string()) }
    }

    /// One template argument, either `key=value` or positional. The name
    /// side is parsed with `equal` set so a bare `=` terminates it.
    rule template_arg(stt: &State) -> Attribute
    = name:template_text(&stt.pushed(Tag::TemplateArg, true).pushed(Tag::Equal, true))
      "=" space()*
      value:template_text(&stt.pushed(Tag::TemplateArg, true))
      { Attribute { key: Fragment::Seq(name), val: Some(Fragment::Seq(value)) } }
    / value:template_text(&stt.pushed(Tag::TemplateArg, true))
      { Attribute { key: Fragment::Seq(value), val: None } }

    /// Inline content inside a template, which may span lines.
    rule template_text(stx: &State) -> Vec<Fragment>
    = t:(
          !inline_breaks(stx) e:inline_element(stx) { e }
        / newline() { Fragment::text("\n") }
      )*
    { t }

    /// A template parameter. There is no substitution frame at this
    /// level, so it renders its default value, or nothing.
    ///
    /// ```wikitext
    /// {{{parameter_name|default}}}
    /// ```
    rule template_param(st: &State) -> Fragment
    = stt:({ st.incremented(Tag::TemplateDepth).pushed_str(Tag::Preproc, "}}") })
      "{{{"
      template_text(&stt.pushed(Tag::TemplateArg, true))
      default:("|" d:template_text(&stt.pushed(Tag::TemplateArg, true)) { d })?
      "}}}"
    { default.map(Fragment::Seq).unwrap_or_default() }

    ///////////
    // Links //
    ///////////

    /// An internal link, or literal `[[` when unterminated.
    ///
    /// ```wikitext
    /// [[Target]]  [[Target|Label]]  [[Target]]trail
    /// ```
    rule wikilink(st: &State) -> Fragment
    = stl:({ st.pushed_str(Tag::Preproc, "]]") })
      "[["
      target:$(wikilink_target_char()+)
      &assert(!target.trim().is_empty(), "wikilink target")
      content:("|" c:wikilink_content(&stl) { c })*
      "]]"
      trail:$(['a'..='z'|'A'..='Z']*)
    {
        let title = target.trim();
        let mut children = if content.is_empty() {
            vec![Fragment::text(title)]
        } else {
            let mut joined = Vec::new();
            for (index, part) in content.into_iter().enumerate() {
                if index > 0 {
                    joined.push(Fragment::text("|"));
                }
                joined.extend(part);
            }
            joined
        };
        if !trail.is_empty() {
            children.push(Fragment::text(trail));
        }
        let mut anchor = Element::new("a").attr("href", title_to_url(title));
        anchor.children = children;
        Fragment::Node(anchor)
    }
    / t:$("[[") { Fragment::text(t) }

    /// Characters valid in a wikilink target.
    rule wikilink_target_char()
    = [^'|'|'['|']'|'{'|'}'|'<'|'>'|'\r'|'\n']

    /// One pipe-separated part of a wikilink label, parsed as a link
    /// description so `|` and the closing `]]` terminate it.
    rule wikilink_content(stl: &State) -> Vec<Fragment>
    = t:(
        !inline_breaks(&stl.pushed(Tag::Linkdesc, true))
        e:inline_element(&stl.pushed(Tag::Linkdesc, true))
        { e }
      )*
    { t }

    /// An external link, or literal `[` when it is not one.
    ///
    /// ```wikitext
    /// [http://example.com/ Label]  [http://example.com/]
    /// ```
    rule extlink(st: &State) -> Fragment
    = ste:({ st.pushed(Tag::Extlink, true) })
      "["
      proto:url_protocol()
      addr:$(url_char()*)
      label:([' '|'\t']+ l:extlink_label(&ste) { l })?
      "]"
    {
        let href = format!("{proto}{addr}");
        let (class, children) = match label {
            Some(label) => ("external", label),
            None => {
                let ordinal = cx.next_extlink_ordinal();
                ("external autonumber", vec![Fragment::text(format!("[{ordinal}]"))])
            }
        };
        let mut anchor = Element::new("a")
            .attr("href", href)
            .attr("class", class);
        anchor.children = children;
        Fragment::Node(anchor)
    }
    / t:$("[") { Fragment::text(t) }

    /// The label of an external link; a single `]` terminates it.
    rule extlink_label(ste: &State) -> Vec<Fragment>
    = t:(
        !inline_breaks(ste)
        e:inline_element(ste)
        { e }
      )*
    { t }

    /// The protocol part of a URL.
    ///
    /// ```text
    /// https://example.com   //example.com   mailto:test@example.com
    /// ^^^^^^^^              ^^              ^^^^^^^
    /// ```
    #[cache]
    rule url_protocol() -> &'input str
    = p:$("//" / ['A'..='Z'|'a'..='z']+ ":" "//"?)
      {?
        if contains_ignore_case(cx.config.protocols, p) {
            Ok(p)
        } else {
            Err("valid protocol")
        }
      }

    /// Characters valid in the address of an external link.
    rule url_char()
    = [^' '|'\t'|'\r'|'\n'|'['|']'|'<'|'>'|'"'|'|']

    /////////////////
    // Text styles //
    /////////////////

    /// Bold and italic quote runs; unterminated runs decay to literal
    /// apostrophes.
    ///
    /// ```wikitext
    /// ''italic'' '''bold''' '''''bold italic'''''
    /// ```
    rule quoted(st: &State) -> Fragment
    = bold_italic(st)
    / bold(st)
    / italic(st)
    / t:$("'"+) { Fragment::text(t) }

    rule bold_italic(st: &State) -> Fragment
    = "'''''" c:styled_content(st, <"'''''">) "'''''"
    {
        let mut b = Element::new("b");
        b.children = vec![element("i", c)];
        Fragment::Node(b)
    }

    rule bold(st: &State) -> Fragment
    = "'''" !"'" c:styled_content(st, <"'''">) "'''"
    { element("b", c) }

    rule italic(st: &State) -> Fragment
    = "''" !"'" c:styled_content(st, <"''">) "''"
    { element("i", c) }

    /// Inline content inside a quote run, confined to one line and
    /// stopping before the closing marker.
    rule styled_content(st: &State, close: rule<()>) -> Vec<Fragment>
    = t:(
        !close()
        !newline()
        !inline_breaks(st)
        e:inline_element(st)
        { e }
      )+
    { t }

    //////////////////////////
    // Angle bracket markup //
    //////////////////////////

    /// Anything starting with `<`: a comment, an inclusion control tag, an
    /// XML-ish tag, or a literal `<`.
    rule angle_bracket_markup(st: &State) -> Fragment
    = comment()
    / include_limits(st)
    / xmlish_tag(st)
    / t:$("<") { Fragment::text(t) }

    /// An HTML comment. Unterminated comments run to end of input, the
    /// same way the legacy parser strips them.
    #[cache]
    rule comment() -> Fragment
    = "<!--" (!"-->" [_])* ("-->" / eof())
    { Fragment::Empty }

    /// Inclusion control tags. The converter always renders full pages,
    /// never transclusions: `<noinclude>` and `<onlyinclude>` content is
    /// kept, `<includeonly>` content is dropped. The matching counter is
    /// raised while the content is parsed so the closing tag terminates
    /// inline flow.
    rule include_limits(st: &State) -> Fragment
    = "<" ("noinclude" / "includeonly" / "onlyinclude") space_or_newline()* "/>"
      { Fragment::Empty }
    / "<noinclude" space_or_newline()* ">"
      c:include_content(&st.incremented(Tag::NoInclude))
      "</noinclude>"?
      { Fragment::Seq(c) }
    / "<includeonly" space_or_newline()* ">"
      include_content(&st.incremented(Tag::IncludeOnly))
      "</includeonly>"?
      { Fragment::Empty }
    / "<onlyinclude" space_or_newline()* ">"
      c:include_content(&st.incremented(Tag::OnlyInclude))
      "</onlyinclude>"?
      { Fragment::Seq(c) }
    / t:$("</noinclude>" / "</includeonly>" / "</onlyinclude>") { Fragment::Empty }

    /// Content of an inclusion control tag, which may span lines.
    rule include_content(sti: &State) -> Vec<Fragment>
    = t:(
          !inline_breaks(sti) e:inline_element(sti) { e }
        / newline() { Fragment::text("\n") }
      )*
    { t }

    /// An XML-ish start, end, or self-closing tag. End tags and start
    /// tags of non-void elements come out as sentinel token nodes; the
    /// reconstruction pass pairs them up after parsing.
    ///
    /// ```wikitext
    /// <tag-name attr="value">content</tag-name>
    /// ^^^^^^^^^^^^^^^^^^^^^^^       ^^^^^^^^^^^
    /// ```
    rule xmlish_tag(st: &State) -> Fragment
    = "<" close:"/"? name:$(tag_name_char()+)
      &assert(
        is_html_tag(name) || contains_ignore_case(cx.config.extension_tags, name),
        "known tag")
      attrs:(generic_attribute(&st.pushed(Tag::ExtTag, true)))*
      space_or_newline_or_solidus()*
      selfclose:"/"?
      space()*
      ">"
    {
        let name = name.to_ascii_lowercase();
        let mut close = close.is_some();
        // Support </br>
        if name == "br" && close {
            close = false;
        }
        let mut tag = Element::new(name.clone());
        if close {
            tag = tag.attr(PARSE_END, "");
        } else {
            for (key, value) in attrs {
                tag = tag.attr(key, value);
            }
            if selfclose.is_none() && !VOID_TAGS.contains(name.as_str()) {
                tag = tag.attr(PARSE_START, "");
            }
        }
        Fragment::Node(tag)
    }

    /// Characters valid in a tag name.
    rule tag_name_char() = ['a'..='z'|'A'..='Z'|'0'..='9'|'-'|'_']

    /// An XML tag attribute, which may span lines.
    ///
    /// ```wikitext
    /// <tag-name attr="value" attr2=value2>content</tag-name>
    ///           ^^^^^^^^^^^^ ^^^^^^^^^^^^
    /// ```
    rule generic_attribute(sta: &State) -> (String, String)
    = space_or_newline()+
      name:$(attr_name_char()+)
      value:(space()* "=" space()* v:attr_value(sta) { v })?
    { (name.to_ascii_lowercase(), value.unwrap_or_default()) }

    /// An XML attribute confined to a single line, used by table markup.
    ///
    /// ```wikitext
    /// {| class="wikitable" style="width: 5em"
    ///    ^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^^
    /// ```
    rule table_attribute(sta: &State) -> (String, String)
    = space()*
      !inline_breaks(sta)
      name:$(attr_name_char()+)
      value:(space()* "=" space()* v:attr_value(sta) { v })?
    { (name.to_ascii_lowercase(), value.unwrap_or_default()) }

    /// Characters valid in an attribute name.
    rule attr_name_char() = ['a'..='z'|'A'..='Z'|'0'..='9'|'-'|'_'|':']

    /// An attribute value: quoted, a template expansion, or unquoted.
    rule attr_value(sta: &State) -> String
    = "\"" v:$((!['"'|'\r'|'\n'] [_])*) "\"" { v.to_string() }
    / "'" v:$((!['\''|'\r'|'\n'] [_])*) "'" { v.to_string() }
    / t:template(&sta.pushed(Tag::ExtTag, true)) { t.into_text() }
    / v:$([^' '|'\t'|'\r'|'\n'|'|'|'>'|'/']+) { v.to_string() }

    //////////////
    // Entities //
    //////////////

    /// A named, decimal, or hexadecimal HTML entity. Decoded to its
    /// character; re-escaped on render.
    rule html_entity() -> Fragment
    = m:$("&" ("#" ['x'|'X']? ['0'..='9'|'a'..='f'|'A'..='F']+ / ['a'..='z'|'A'..='Z'|'0'..='9']+) ";")
    {?
        let decoded = html_escape::decode_html_entities(m);
        if decoded == m {
            Err("entity")
        } else {
            Ok(Fragment::text(decoded.into_owned()))
        }
    }

    ////////////
    // Tables //
    ////////////

    /// A wikitext table.
    ///
    /// ```wikitext
    /// {| k="v"
    /// |+ caption
    /// ! h !! h2
    /// |- r-k="v"
    /// | d || d2
    /// |}
    /// ```
    rule table(st: &State) -> Fragment
    = stt:({ st.pushed(Tag::Table, true) })
      "{|" attrs:table_attr_line(&stt)
      lines:(
          newline()
          !(space()* "|}")
          l:table_line(&stt)?
          { l }
      )*
      (newline() space()*)?
      "|}"
    { table_fragment(attrs, lines.into_iter().flatten().collect()) }

    /// The attribute list on a table or row line.
    rule table_attr_line(stt: &State) -> Vec<(String, String)>
    = attrs:(table_attribute(&stt.pushed(Tag::TableCellArg, true)))*
      space()*
    { attrs }

    /// One line of a table body.
    rule table_line(stt: &State) -> TableLine
    = space()* "|+" c:inlineline(stt)?
      { TableLine::Caption(c.unwrap_or_default()) }
    / space()* "|-" "-"* attrs:table_attr_line(stt)
      { TableLine::Row(attrs) }
    / space()* "!" cells:table_cells(stt, true)
      { TableLine::Cells(cells) }
    / space()* "|" cells:table_cells(stt, false)
      { TableLine::Cells(cells) }

    /// The cells of one table line, split on `||` (or `!!` in header
    /// rows).
    rule table_cells(stt: &State, header: bool) -> Vec<Cell>
    = first:table_cell(stt, header)
      rest:(cell_sep(header) c:table_cell(stt, header) { c })*
    {
        let mut cells = vec![first];
        cells.extend(rest);
        cells
    }

    /// The in-line separator between two cells.
    rule cell_sep(header: bool)
    = "||"
    / &assert(header, "header separator") "!!"

    /// One table cell: an optional attribute list terminated by a single
    /// `|`, then inline content.
    rule table_cell(stt: &State, header: bool) -> Cell
    = attrs:cell_attrs(stt)?
      content:table_cell_content(stt, header)?
    { Cell { header, attrs: attrs.unwrap_or_default(), content: content.unwrap_or_default() } }

    /// Inline table attributes terminated by a single pipe.
    ///
    /// ```wikitext
    /// {| ... |- ... ! h-k="v" | h ...  | d-k="v" | d ...
    ///           ^^^^^^^^^           ^^^^^^^^^
    /// ```
    rule cell_attrs(stt: &State) -> Vec<(String, String)>
    = attrs:(table_attribute(&stt.pushed(Tag::TableCellArg, true)))+
      space()*
      "|" !"|"
    { attrs }

    /// Cell content; header cells are parsed with `th` set so `!!`
    /// terminates them.
    rule table_cell_content(stt: &State, header: bool) -> Vec<Fragment>
    = st2:({ if header { stt.pushed(Tag::Th, true) } else { stt.clone() } })
      t:(
        !inline_breaks(&st2)
        e:inline_element(&st2)
        { e }
      )+
    { t }

    /////////////
    // Utility //
    /////////////

    /// Non-line-ending whitespace.
    rule space() = [' '|'\t']

    /// Characters that match the PCRE "\s" class.
    rule space_or_newline() = [' '|'\t'|'\n'|'\r'|'\x0c']

    /// Junk permitted before the `>` of an XML-ish tag.
    rule space_or_newline_or_solidus() = space_or_newline() / ("/" !">")

    /// A newline.
    rule newline() = "\r"? "\n"

    /// A positive lookahead for the end of input.
    rule eof() = ![_]

    /// Any newline or end of file.
    rule eolf() = newline() / eof()

    /// Asserts a precondition given by `cond`.
    rule assert(cond: bool, msg: &'static str)
    = {? if cond { Ok(()) } else { Err(msg) } }
}}

/// One parsed table cell.
#[derive(Clone, Debug)]
struct Cell {
    header: bool,
    attrs: Vec<(String, String)>,
    content: Vec<Fragment>,
}

/// One parsed line of a table body.
#[derive(Clone, Debug)]
enum TableLine {
    Caption(Vec<Fragment>),
    Row(Vec<(String, String)>),
    Cells(Vec<Cell>),
}

/// Builds an element fragment from children.
fn element(name: &str, children: Vec<Fragment>) -> Fragment {
    let mut el = Element::new(name);
    el.children = children;
    Fragment::Node(el)
}

/// Wraps a paragraph line in `<p>` when its leading fragment is textual
/// (plain text, a template expansion, an internal link). Lines led by any
/// other element stand on their own.
fn paragraph_fragment(children: Vec<Fragment>) -> Fragment {
    let wrap = children
        .iter()
        .find(|child| !matches!(child, Fragment::Empty))
        .map_or(true, |leader| match leader {
            Fragment::Node(el) => {
                el.name == "a"
                    && el
                        .attrs
                        .iter()
                        .any(|(name, value)| name == "href" && value.starts_with("./"))
            }
            _ => true,
        });
    if wrap {
        element("p", children)
    } else {
        Fragment::Seq(children)
    }
}

/// Builds a heading fragment. The level is the shorter run of `=`,
/// clamped to six; surplus markers decay into heading text on their own
/// side.
fn heading_fragment(open: &str, content: Option<Vec<Fragment>>, close: &str) -> Fragment {
    let level = open.len().min(close.len()).min(6);
    let mut children = Vec::new();
    if open.len() > level {
        children.push(Fragment::text("=".repeat(open.len() - level)));
    }
    children.extend(content.into_iter().flatten());
    if close.len() > level {
        children.push(Fragment::text("=".repeat(close.len() - level)));
    }
    let mut el = Element::new(format!("h{level}"));
    el.children = children;
    Fragment::Node(el)
}

/// Assembles table lines into a `<table>` element. Cell lines before any
/// `|-` open an implicit first row.
fn table_fragment(attrs: Vec<(String, String)>, lines: Vec<TableLine>) -> Fragment {
    let mut table = Element::new("table");
    table.attrs = attrs;

    let mut current: Option<Element> = None;
    for line in lines {
        match line {
            TableLine::Caption(content) => {
                let mut caption = Element::new("caption");
                caption.children = content;
                table.children.push(Fragment::Node(caption));
            }
            TableLine::Row(attrs) => {
                if let Some(row) = current.take() {
                    table.children.push(Fragment::Node(row));
                }
                let mut row = Element::new("tr");
                row.attrs = attrs;
                current = Some(row);
            }
            TableLine::Cells(cells) => {
                let row = current.get_or_insert_with(|| Element::new("tr"));
                for cell in cells {
                    let mut el = Element::new(if cell.header { "th" } else { "td" });
                    el.attrs = cell.attrs;
                    el.children = cell.content;
                    row.children.push(Fragment::Node(el));
                }
            }
        }
    }
    if let Some(row) = current.take() {
        table.children.push(Fragment::Node(row));
    }

    Fragment::Node(table)
}

/// Decides whether the byte at `pos` terminates the current inline
/// production. Only a fixed set of bytes can ever break; each case
/// consults specific state entries.
fn inline_breaks_at(input: &str, pos: usize, st: &State) -> RuleResult<()> {
    let bytes = input.as_bytes();
    let rest = &input[pos..];
    let next = bytes.get(pos + 1).copied();

    let at_terminator = match bytes[pos] {
        b'=' => {
            if st.top_bool(Tag::Arrow) && next == Some(b'>') {
                // `from => to`
                //       ^
                true
            } else if st.top_bool(Tag::Equal) {
                // `{{t|k=v}}`
                //       ^
                true
            } else if st.count(Tag::H) > 0 {
                // `=heading=== <!-- junk -->␤`
                //          ^
                pos == input.len() - 1 || HEADING_END.is_match(&input[pos + 1..])
            } else {
                false
            }
        }
        b'|' => {
            // `{{a|b|c}}`
            //       ^
            (st.top_bool(Tag::TemplateArg) && !st.top_bool(Tag::ExtTag))
                // `{| ... k="v"| ...`
                //              ^
                || st.top_bool(Tag::TableCellArg)
                // `[[a|b|c]]`
                //       ^
                || st.top_bool(Tag::Linkdesc)
                // `{| ... d || d2 ... |}`
                //           ^         ^
                || (st.top_bool(Tag::Table) && matches!(next, Some(b'}' | b'|')))
        }
        b'!' => {
            // `{| ! h !! h2`
            //         ^
            st.top_bool(Tag::Th) && st.count(Tag::TemplateDepth) == 0 && next == Some(b'!')
        }
        b'{' => {
            // `{{!}}` pipe templates
            (st.top_bool(Tag::TableCellArg) && rest.starts_with("{{!}}"))
                || (st.top_bool(Tag::Table) && rest.starts_with("{{!}}{{!}}"))
        }
        b'}' => {
            // `{{a}}`
            //     ^
            st.top_str(Tag::Preproc).is_some_and(|p| rest.starts_with(p))
        }
        b':' => {
            // `; dt : dd`
            //       ^
            st.count(Tag::Colon) > 0
                && !st.top_bool(Tag::Extlink)
                && st.count(Tag::TemplateDepth) == 0
                && !st.top_bool(Tag::Linkdesc)
                && st.top_str(Tag::Preproc) != Some("}-")
        }
        b';' => st.top_bool(Tag::Semicolon),
        c @ (b'\r' | b'\n') => {
            if !st.top_bool(Tag::Table) {
                false
            } else {
                // `{| ... ␤ ! ...`
                // `{| ... ␤ | ...`
                //           ^
                let extra = usize::from(c == b'\r' && next == Some(b'\n'));
                let mut ok = false;
                for b in bytes[pos + 1 + extra..].iter() {
                    if matches!(b, b'!' | b'|') {
                        ok = true;
                        break;
                    } else if !b.is_ascii_whitespace() {
                        break;
                    }
                }
                ok
            }
        }
        // `{| ... k="v" [[link]] ...`
        //               ^
        b'[' => st.top_bool(Tag::TableCellArg) && rest.starts_with("[["),
        // `{| ... k="v" -{lang}- ...`
        //               ^
        b'-' => st.top_bool(Tag::TableCellArg) && rest.starts_with("-{"),
        b']' => {
            // `[http://example.com]`
            //                     ^
            st.top_bool(Tag::Extlink)
                // `[[a]]`
                //     ^
                || st.top_str(Tag::Preproc).is_some_and(|p| rest.starts_with(p))
        }
        b'<' => {
            (st.count(Tag::NoInclude) > 0 && rest.starts_with("</noinclude>"))
                || (st.count(Tag::IncludeOnly) > 0 && rest.starts_with("</includeonly>"))
                || (st.count(Tag::OnlyInclude) > 0 && rest.starts_with("</onlyinclude>"))
        }
        b => panic!("unhandled inline break byte {:?}", b as char),
    };

    if at_terminator {
        RuleResult::Matched(pos, ())
    } else {
        RuleResult::Failed
    }
}
