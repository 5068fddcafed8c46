//! End-to-end rope scenarios: a single tree taken through split/merge/insert
//! /remove/balance the way an editor buffer would, checked only against its
//! flattened string content.

use corebase::rope::Rope;

#[test]
fn split_then_merge_is_a_round_trip() {
    let mut rope = Rope::new("the quick brown fox jumps over the lazy dog");
    let original = rope.splice();

    let tail = rope.split(16);
    assert_eq!(rope.splice(), "the quick brown ");
    assert_eq!(tail.splice(), "fox jumps over the lazy dog");

    rope.merge(tail);
    assert_eq!(rope.splice(), original);
    assert_eq!(rope.len(), original.chars().count());
}

#[test]
fn insert_splices_new_content_in_the_middle() {
    let mut rope = Rope::new("hello world");
    rope.insert(5, Rope::new(","));
    assert_eq!(rope.splice(), "hello, world");

    rope.insert(rope.len(), Rope::new("!"));
    assert_eq!(rope.splice(), "hello, world!");

    rope.insert(0, Rope::new(">> "));
    assert_eq!(rope.splice(), ">> hello, world!");
}

#[test]
fn remove_excises_a_range_and_returns_it() {
    let mut rope = Rope::new("the quick brown fox");
    let excised = rope.remove(4, 6);
    assert_eq!(excised.splice(), "quick ");
    assert_eq!(rope.splice(), "the brown fox");
}

#[test]
fn append_and_formatted_insert_compose_with_balance() {
    let mut rope = Rope::new("a");
    for c in ['b', 'c', 'd', 'e', 'f', 'g'] {
        rope.append(c.to_string());
    }
    assert_eq!(rope.splice(), "abcdefg");

    rope.insert_formatted(3, format_args!("[{}]", 42));
    assert_eq!(rope.splice(), "abc[42]defg");

    let before = rope.splice();
    rope.balance();
    assert_eq!(rope.splice(), before);
    assert_eq!(rope.len(), before.chars().count());
}

#[test]
fn at_indexes_survive_a_sequence_of_mutations() {
    let mut rope = Rope::new("0123456789");
    rope.insert(5, Rope::new("abc"));
    // "01234abc56789"
    assert_eq!(rope.at(5), Some('a'));
    assert_eq!(rope.at(7), Some('c'));
    assert_eq!(rope.at(8), Some('5'));

    let removed = rope.remove(0, 5);
    assert_eq!(removed.splice(), "01234");
    assert_eq!(rope.at(0), Some('a'));
}
