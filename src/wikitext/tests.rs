//! Converter tests: end-to-end wikitext → sanitized HTML.

use super::*;
use crate::wikitext::parser_fns::{site_handler, SiteContext};

#[track_caller]
fn run(input: &str) -> String {
    let _ = env_logger::try_init();
    convert(input, &Options::default()).unwrap()
}

#[track_caller]
fn run_with<'a>(input: &str, opts: &Options<'a>) -> String {
    let _ = env_logger::try_init();
    convert(input, opts).unwrap()
}

#[test]
fn test_convert() {
    let cases = [
        ("Blah", "<p>Blah</p>"),
        ("== Test ==", "<h2> Test </h2>"),
        ("=Test=", "<h1>Test</h1>"),
        ("'''Test'''", "<b>Test</b>"),
        (
            "* foo\n* nah\n* woof",
            "<li> foo</li>\n<li> nah</li>\n<li> woof</li>",
        ),
        ("----", "<hr/>"),
        (
            "[[Jordanstown]]",
            "<p><a href=\"./Jordanstown\">Jordanstown</a></p>",
        ),
        (
            "[[Jordanstown|Blah]]",
            "<p><a href=\"./Jordanstown\">Blah</a></p>",
        ),
        (
            "[http://example.com/ Yes Foo Bar]",
            "<a href=\"http://example.com/\" class=\"external\" rel=\"nofollow\">Yes Foo Bar</a>",
        ),
    ];

    for (input, want) in cases {
        assert_eq!(run(input), want, "convert({input:?})");
    }
}

#[test]
fn test_template_handler_splices_result() {
    let handler = |name: &str, _args: &[Attribute]| -> Result<Fragment, HandlerError> {
        if name == "reflink" {
            Ok(Fragment::text(""))
        } else {
            Err(HandlerError::UnknownTemplate)
        }
    };
    let opts = Options {
        template_handler: Some(&handler),
        ..Default::default()
    };
    assert_eq!(run_with("{{reflink}}\n\nBlah", &opts), "<p></p><p>Blah</p>");
}

#[test]
fn test_template_arguments_reach_the_handler() {
    let handler = |name: &str, args: &[Attribute]| -> Result<Fragment, HandlerError> {
        assert_eq!(name, "tmpl");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].key_text(), "a");
        assert!(args[0].val.is_none());
        assert_eq!(args[1].key_text(), "k");
        assert_eq!(args[1].value_text(), "v");
        Ok(Fragment::text("X"))
    };
    let opts = Options {
        template_handler: Some(&handler),
        ..Default::default()
    };
    assert_eq!(run_with("{{tmpl|a|k=v}}", &opts), "<p>X</p>");
}

#[test]
fn test_parser_functions_through_site_handler() {
    let handler = site_handler(SiteContext {
        title: "Template:Example".to_string(),
        article_count: 3,
    });
    let opts = Options {
        template_handler: Some(&handler),
        ..Default::default()
    };
    let cases = [
        ("{{#if:x|yes|no}}", "<p>yes</p>"),
        ("{{#if:|yes|no}}", "<p>no</p>"),
        ("{{#ifeq:1.0|1|same|diff}}", "<p>same</p>"),
        ("{{#ifeq:a|b|same|diff}}", "<p>diff</p>"),
        ("{{#invoke:Foo|bar}}", "<p></p>"),
        ("{{NAMESPACE}}", "<p>Template</p>"),
        ("{{NUMBEROFARTICLES}}", "<p>3</p>"),
    ];
    for (input, want) in cases {
        assert_eq!(run_with(input, &opts), want, "convert({input:?})");
    }
}

#[test]
fn test_unknown_template_degrades_or_rejects() {
    assert_eq!(run("{{nope}}"), "<p></p>");

    let strict = Options {
        strict: true,
        ..Default::default()
    };
    match convert("{{nope}}", &strict) {
        Err(Error::Template { name, .. }) => assert_eq!(name, "nope"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_unbalanced_tags_degrade_or_reject() {
    // An early close inside a paragraph pushes the tail out of it.
    assert_eq!(run("a</div>b"), "<p>a</p>b");
    // A top-level close with no start is dropped outright.
    assert_eq!(run("</div>after"), "after");

    let strict = Options {
        strict: true,
        ..Default::default()
    };
    assert!(matches!(
        convert("</div>after", &strict),
        Err(Error::Residual(1))
    ));
}

#[test]
fn test_cancellation() {
    let cancel = crate::Cancel::new();
    cancel.cancel();
    let opts = Options {
        cancel: Some(&cancel),
        ..Default::default()
    };
    assert!(matches!(
        convert("some text", &opts),
        Err(Error::Cancelled)
    ));
}

#[test]
fn test_boundaries() {
    // Empty in, empty out; missing trailing newlines never matter.
    assert_eq!(run(""), "");
    assert_eq!(run("\n\n"), "");
    assert_eq!(run("Blah\n"), "<p>Blah</p>");
}

#[test]
fn test_headings() {
    let cases = [
        ("=== Deep ===", "<h3> Deep </h3>"),
        ("======= Over =======", "<h6>= Over =</h6>"),
        ("==Left===", "<h2>Left=</h2>"),
        ("== A ==<!-- junk -->", "<h2> A </h2>"),
        // Not headings at all.
        ("== nope", "<p>== nope</p>"),
        ("=", "<p>=</p>"),
    ];
    for (input, want) in cases {
        assert_eq!(run(input), want, "convert({input:?})");
    }
}

#[test]
fn test_definition_lists() {
    assert_eq!(run("; Term : Detail"), "<dt> Term </dt><dd> Detail</dd>");
    assert_eq!(run(";Term"), "<dt>Term</dt>");
    assert_eq!(run(": Indented"), "<dd> Indented</dd>");
}

#[test]
fn test_text_styles() {
    assert_eq!(run("''name''"), "<i>name</i>");
    assert_eq!(run("'''''both'''''"), "<b><i>both</i></b>");
    assert_eq!(run("it's fine"), "<p>it's fine</p>");
    assert_eq!(run("''unclosed"), "<p>''unclosed</p>");
}

#[test]
fn test_wikilinks() {
    let cases = [
        (
            "[[Anarchism in Spain]]",
            "<p><a href=\"./Anarchism_in_Spain\">Anarchism in Spain</a></p>",
        ),
        // The link trail joins the label.
        (
            "[[cat]]s drink",
            "<p><a href=\"./cat\">cats</a> drink</p>",
        ),
        ("[[a|b|c]]", "<p><a href=\"./a\">b|c</a></p>"),
        // Unterminated links decay to text.
        ("[[ nope", "<p>[[ nope</p>"),
    ];
    for (input, want) in cases {
        assert_eq!(run(input), want, "convert({input:?})");
    }
}

#[test]
fn test_external_links() {
    // Unlabelled links autonumber per document.
    assert_eq!(
        run("[http://a.example/] and [http://b.example/]"),
        "<a href=\"http://a.example/\" class=\"external autonumber\" rel=\"nofollow\">[1]</a> \
         and <a href=\"http://b.example/\" class=\"external autonumber\" rel=\"nofollow\">[2]</a>"
    );
    // An unknown protocol is not a link.
    assert_eq!(run("[gopher://x y]"), "<p>[gopher://x y]</p>");
}

#[test]
fn test_comments_and_entities() {
    assert_eq!(run("a<!-- hidden -->b"), "<p>ab</p>");
    assert_eq!(run("a &amp; b"), "<p>a &amp; b</p>");
    assert_eq!(run("&#65;BC"), "<p>ABC</p>");
    assert_eq!(run("&bogus; stays"), "<p>&amp;bogus; stays</p>");
}

#[test]
fn test_xmlish_tags_reconstruct() {
    assert_eq!(run("<div>content</div>"), "<div>content</div>");
    assert_eq!(
        run("a <span id=\"x\">mid</span> b"),
        "<p>a <span id=\"x\">mid</span> b</p>"
    );
    assert_eq!(run("<ref>cite</ref>"), "<ref>cite</ref>");
    // Unknown tags are not markup.
    assert_eq!(run("<foobar>x"), "<p>&lt;foobar&gt;x</p>");
}

#[test]
fn test_inclusion_controls() {
    assert_eq!(run("a<noinclude>b</noinclude>c"), "<p>abc</p>");
    assert_eq!(run("a<includeonly>b</includeonly>c"), "<p>ac</p>");
    assert_eq!(run("a<onlyinclude>b</onlyinclude>c"), "<p>abc</p>");
}

#[test]
fn test_tables() {
    let input = "{| class=\"wikitable\"\n! A !! B\n|-\n| c || d\n|}";
    assert_eq!(
        run(input),
        "<table class=\"wikitable\">\
         <tr><th> A </th><th> B</th></tr>\
         <tr><td> c </td><td> d</td></tr>\
         </table>"
    );

    let with_caption = "{|\n|+ Caption\n| only\n|}";
    assert_eq!(
        run(with_caption),
        "<table><caption> Caption</caption><tr><td> only</td></tr></table>"
    );
}

/// Conversion is best-effort: pathological input terminates and produces
/// output instead of failing, and marker attributes never leak.
#[test]
fn test_degenerate_input_terminates() {
    let nasty = [
        "{{", "}}", "[[", "]]", "[", "]", "'''", "''", "<div", "</",
        "{|", "|}", "|", "!", "<!--", "= ==", "{{a|{{b|{{c}}}}",
        "[[a|[[b]]]]", "<noinclude>", "&#xZZ;", ";;;:::",
    ];
    for input in nasty {
        let out = convert(input, &Options::default())
            .unwrap_or_else(|err| panic!("convert({input:?}) failed: {err}"));
        assert!(
            !out.contains("_parsestart") && !out.contains("_parseend"),
            "marker leaked from convert({input:?}): {out:?}"
        );
    }
}

#[test]
fn test_no_markers_in_composite_output() {
    let input = "== H ==\n<div>a<span>b</span></div>\n* item\n{{nope}}\n";
    let out = run(input);
    assert!(!out.contains("_parse"), "markers leaked: {out:?}");
}
